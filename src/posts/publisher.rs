//! Platform publishers and the per-platform rate-limited registry

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use super::{AccountRef, PostContent, PublishError};

/// Publishes content to one platform
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Platform key (e.g. `instagram`)
    fn platform(&self) -> &str;

    /// Publish to one account; returns the post URL when the platform reports one
    async fn publish(
        &self,
        account: &AccountRef,
        content: &PostContent,
    ) -> Result<Option<String>, PublishError>;
}

struct Registered {
    publisher: Arc<dyn Publisher>,
    limiter: Arc<DefaultDirectRateLimiter>,
}

/// Routes each account to its platform's publisher, throttled per platform
pub struct PublisherRegistry {
    per_minute: NonZeroU32,
    publishers: HashMap<String, Registered>,
    fallback: Option<Registered>,
}

impl PublisherRegistry {
    /// `per_minute` publications allowed per platform (minimum 1)
    pub fn new(per_minute: u32) -> Self {
        Self {
            per_minute: NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN),
            publishers: HashMap::new(),
            fallback: None,
        }
    }

    fn entry(&self, publisher: Arc<dyn Publisher>) -> Registered {
        Registered {
            publisher,
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(self.per_minute))),
        }
    }

    pub fn register(mut self, publisher: Arc<dyn Publisher>) -> Self {
        let key = publisher.platform().to_lowercase();
        let entry = self.entry(publisher);
        self.publishers.insert(key, entry);
        self
    }

    /// Publisher for platforms without a dedicated one
    pub fn with_fallback(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.fallback = Some(self.entry(publisher));
        self
    }

    pub fn platforms(&self) -> Vec<&str> {
        let mut platforms: Vec<&str> = self.publishers.keys().map(String::as_str).collect();
        platforms.sort_unstable();
        platforms
    }

    pub fn supports(&self, platform: &str) -> bool {
        self.fallback.is_some() || self.publishers.contains_key(&platform.to_lowercase())
    }

    /// Publish to one account, waiting for the platform's rate limit
    pub async fn publish(
        &self,
        account: &AccountRef,
        content: &PostContent,
    ) -> Result<Option<String>, PublishError> {
        let registered = self
            .publishers
            .get(&account.platform.to_lowercase())
            .or(self.fallback.as_ref())
            .ok_or_else(|| PublishError::NoPublisher(account.platform.clone()))?;

        registered.limiter.until_ready().await;
        let outcome = registered.publisher.publish(account, content).await;
        crate::metrics::record_post_outcome(&account.platform, outcome.is_ok());
        outcome
    }
}

impl Default for PublisherRegistry {
    fn default() -> Self {
        Self::new(crate::config::PostsConfig::default().rate_limit_per_minute)
    }
}
