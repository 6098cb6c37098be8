//! Webhook publisher
//!
//! Hands each publication to an external relay as a JSON POST. The relay
//! answers 2xx, optionally with `{"url": "..."}` naming the created post.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::{AccountRef, PostContent, PublishError, Publisher};
use crate::utils::retry::{with_retry_if, RetryConfig};

/// Webhook publisher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Relay endpoint
    pub url: String,
    /// Sent as a Bearer token
    #[serde(default, skip_serializing)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// In-request retries for transport errors and 5xx answers
    #[serde(default = "default_retries")]
    pub max_retries: u32,
}

fn default_timeout() -> u64 {
    10
}

fn default_retries() -> u32 {
    1
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            headers: HashMap::new(),
            timeout_secs: default_timeout(),
            max_retries: default_retries(),
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("Webhook URL cannot be empty".to_string());
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err("Webhook URL must start with http:// or https://".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("Timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct Payload<'a> {
    platform: &'a str,
    account_id: &'a str,
    text: &'a str,
    media_ref: &'a str,
    hashtags: &'a [String],
}

#[derive(Debug, Default, Deserialize)]
struct Receipt {
    url: Option<String>,
}

/// Publishes through an HTTP relay; registered as the registry fallback or per platform
pub struct WebhookPublisher {
    platform: String,
    config: WebhookConfig,
    client: Client,
}

impl WebhookPublisher {
    pub fn new(config: WebhookConfig) -> Result<Self, PublishError> {
        config.validate().map_err(PublishError::Other)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            platform: "webhook".to_string(),
            config,
            client,
        })
    }

    /// Register under a specific platform key instead of `webhook`
    pub fn for_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    async fn send(&self, payload: &Payload<'_>) -> Result<Option<String>, PublishError> {
        let mut request = self.client.post(&self.config.url).json(payload);
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(PublishError::Rejected {
                status: status.as_u16(),
                message: crate::utils::truncate_text(&body, 200),
            });
        }

        // relays may answer with an empty body
        let body = response.bytes().await?;
        let receipt: Receipt = serde_json::from_slice(&body).unwrap_or_default();
        Ok(receipt.url)
    }
}

#[async_trait]
impl Publisher for WebhookPublisher {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn publish(
        &self,
        account: &AccountRef,
        content: &PostContent,
    ) -> Result<Option<String>, PublishError> {
        let payload = Payload {
            platform: &account.platform,
            account_id: &account.account_id,
            text: &content.text,
            media_ref: &content.media_ref,
            hashtags: &content.hashtags,
        };
        let retry = RetryConfig::with_delays(self.config.max_retries, 500, 5_000);

        let url = with_retry_if(&retry, || self.send(&payload), PublishError::is_recoverable).await?;
        tracing::info!(
            platform = %account.platform,
            account = %account.account_id,
            relay = %self.config.url,
            "Post delivered to webhook"
        );
        Ok(url)
    }
}
