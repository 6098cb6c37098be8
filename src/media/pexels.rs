//! Pexels-style stock photo search

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{ImageAsset, MediaQuery};
use crate::llm::check_status;
use crate::provider::{Provider, ProviderError};

const DEFAULT_BASE_URL: &str = "https://api.pexels.com";

/// Searches a Pexels-compatible API and downloads the matching photos
pub struct PexelsSource {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    photos: Vec<Photo>,
}

#[derive(Debug, Deserialize)]
struct Photo {
    src: PhotoSources,
}

#[derive(Debug, Deserialize)]
struct PhotoSources {
    portrait: Option<String>,
    large: Option<String>,
    original: Option<String>,
}

impl PhotoSources {
    fn best(self) -> Option<String> {
        self.portrait.or(self.large).or(self.original)
    }
}

impl PexelsSource {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured("pexels api key".to_string()));
        }
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn search(&self, query: &MediaQuery) -> Result<Vec<String>, ProviderError> {
        let per_page = query.count.clamp(1, 80).to_string();
        let orientation = if query.resolution.height >= query.resolution.width {
            "portrait"
        } else {
            "landscape"
        };

        let response = self
            .client
            .get(format!("{}/v1/search", self.base_url))
            .header("Authorization", &self.api_key)
            .query(&[
                ("query", query.query.as_str()),
                ("per_page", per_page.as_str()),
                ("orientation", orientation),
            ])
            .send()
            .await?;
        let body: SearchResponse = check_status(response).await?.json().await?;

        Ok(body
            .photos
            .into_iter()
            .filter_map(|p| p.src.best())
            .take(query.count)
            .collect())
    }

    async fn download(&self, url: &str) -> Result<ImageAsset, ProviderError> {
        let response = check_status(self.client.get(url).send().await?).await?;
        let extension = extension_for(
            response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
        );
        let bytes = response.bytes().await?;
        Ok(ImageAsset::new(bytes, extension))
    }
}

fn extension_for(content_type: Option<&str>) -> &'static str {
    match content_type.map(|c| c.split(';').next().unwrap_or(c).trim()) {
        Some("image/png") => "png",
        Some("image/webp") => "webp",
        _ => "jpg",
    }
}

#[async_trait]
impl Provider<MediaQuery, Vec<ImageAsset>> for PexelsSource {
    fn name(&self) -> &str {
        "pexels"
    }

    async fn invoke(&self, input: &MediaQuery) -> Result<Vec<ImageAsset>, ProviderError> {
        let urls = self.search(input).await?;
        if urls.is_empty() {
            return Err(ProviderError::malformed(format!("no photos for '{}'", input.query)));
        }

        let mut images = Vec::with_capacity(urls.len());
        for url in &urls {
            match self.download(url).await {
                Ok(image) => images.push(image),
                Err(e) => tracing::warn!(url = %url, error = %e, "Skipping photo"),
            }
        }

        if images.is_empty() {
            return Err(ProviderError::other("every photo download failed"));
        }
        tracing::debug!(query = %input.query, count = images.len(), "Stock photos fetched");
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Resolution;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn query(count: usize) -> MediaQuery {
        MediaQuery {
            query: "coffee".to_string(),
            count,
            resolution: Resolution::VERTICAL_HD,
        }
    }

    #[test]
    fn test_requires_key() {
        assert!(matches!(
            PexelsSource::new("  "),
            Err(ProviderError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for(Some("image/png; charset=binary")), "png");
        assert_eq!(extension_for(None), "jpg");
    }

    #[tokio::test]
    async fn test_search_and_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .and(header("Authorization", "key-1"))
            .and(query_param("orientation", "portrait"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "photos": [
                    {"src": {"portrait": format!("{}/img/1", server.uri())}},
                    {"src": {"large": format!("{}/img/2", server.uri())}}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img/1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![1u8, 2, 3]),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img/2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = PexelsSource::with_base_url("key-1", server.uri()).unwrap();
        let images = source.invoke(&query(2)).await.unwrap();

        assert_eq!(images.len(), 1);
        assert_eq!(images[0].extension, "png");
        assert_eq!(images[0].bytes.as_ref(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_empty_search_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"photos": []})))
            .mount(&server)
            .await;

        let source = PexelsSource::with_base_url("k", server.uri()).unwrap();
        assert!(source.invoke(&query(3)).await.is_err());
    }

    #[tokio::test]
    async fn test_unauthorized_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let source = PexelsSource::with_base_url("k", server.uri()).unwrap();
        let err = source.invoke(&query(1)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Status { status: 401, .. }));
    }
}
