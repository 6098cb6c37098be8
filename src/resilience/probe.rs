//! Health probes for external dependencies

use async_trait::async_trait;
use reqwest::Client;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Result of one probe run
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProbeOutcome {
    pub success: bool,
    /// The service answered only through a fallback
    pub fallback_used: bool,
    pub fallback_service: Option<String>,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Mark that `service` stood in for the probed one
    pub fn with_fallback(mut self, service: impl Into<String>) -> Self {
        self.fallback_used = true;
        self.fallback_service = Some(service.into());
        self
    }
}

/// A health check for one dependency
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self) -> ProbeOutcome;
}

/// Closure-backed probe; `Ok` is healthy, `Err` is recorded as the failure message
pub struct FnProbe<F> {
    func: F,
}

impl<F> FnProbe<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut, E> Probe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), E>> + Send,
    E: Display,
{
    async fn check(&self) -> ProbeOutcome {
        match (self.func)().await {
            Ok(()) => ProbeOutcome::ok(),
            Err(e) => ProbeOutcome::failed(e.to_string()),
        }
    }
}

/// GET a URL; healthy on 2xx, or on any non-5xx answer when `reachable_only`
pub struct HttpProbe {
    client: Client,
    url: String,
    headers: Vec<(String, String)>,
    reachable_only: bool,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url: url.into(),
            headers: Vec::new(),
            reachable_only: false,
        })
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Count 4xx answers as healthy; for endpoints that reject bare GETs
    pub fn reachable_only(mut self) -> Self {
        self.reachable_only = true;
        self
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self) -> ProbeOutcome {
        let mut request = self.client.get(&self.url);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let healthy = status.is_success()
                    || (self.reachable_only && !status.is_server_error());
                if healthy {
                    ProbeOutcome::ok()
                } else {
                    ProbeOutcome::failed(format!("HTTP {status}"))
                }
            }
            Err(e) => ProbeOutcome::failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fn_probe() {
        let healthy = FnProbe::new(|| async { Ok::<_, String>(()) });
        assert!(healthy.check().await.success);

        let broken = FnProbe::new(|| async { Err::<(), _>("no route") });
        let outcome = broken.check().await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("no route"));
    }

    #[tokio::test]
    async fn test_http_probe() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("x-key", "k"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;

        let timeout = Duration::from_secs(2);
        let authed = HttpProbe::new(server.uri(), timeout).unwrap().with_header("x-key", "k");
        assert!(authed.check().await.success);

        let strict = HttpProbe::new(server.uri(), timeout).unwrap();
        assert_eq!(strict.check().await.error.as_deref(), Some("HTTP 405 Method Not Allowed"));

        let lenient = HttpProbe::new(server.uri(), timeout).unwrap().reachable_only();
        assert!(lenient.check().await.success);
    }
}
