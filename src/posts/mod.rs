//! Social post scheduling
//!
//! [`PostScheduler`] reviews due posts on a timer and publishes them through
//! a [`PublisherRegistry`], retrying failed accounts up to the post's budget.

mod error;
mod model;
mod publisher;
mod scheduler;
mod webhook;

pub use error::{PostError, PublishError};
pub use model::{AccountRef, PostContent, PostRequest, PostResult, PostStatus, ScheduledPost};
pub use publisher::{Publisher, PublisherRegistry};
pub use scheduler::{PostScheduler, PostSchedulerConfig, TickReport};
pub use webhook::{WebhookConfig, WebhookPublisher};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Fails the listed accounts a fixed number of times, counting every attempt
    #[derive(Default)]
    struct Scripted {
        failures: Mutex<HashMap<String, u32>>,
        attempts: Mutex<HashMap<String, u32>>,
    }

    impl Scripted {
        fn failing(account: &str, times: u32) -> Self {
            let scripted = Self::default();
            scripted
                .failures
                .lock()
                .unwrap()
                .insert(account.to_string(), times);
            scripted
        }

        fn attempts(&self, account: &str) -> u32 {
            self.attempts.lock().unwrap().get(account).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl Publisher for Scripted {
        fn platform(&self) -> &str {
            "x"
        }

        async fn publish(
            &self,
            account: &AccountRef,
            _content: &PostContent,
        ) -> Result<Option<String>, PublishError> {
            *self
                .attempts
                .lock()
                .unwrap()
                .entry(account.account_id.clone())
                .or_default() += 1;

            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&account.account_id) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    Err(PublishError::Other(format!("{} is down", account.account_id)))
                }
                _ => Ok(Some(format!("https://x.test/{}", account.account_id))),
            }
        }
    }

    fn request(accounts: &[&str]) -> PostRequest {
        PostRequest {
            content: PostContent {
                text: "Watch this".into(),
                media_ref: "https://cdn.test/video.mp4".into(),
                hashtags: vec!["#demo".into()],
                scheduled_time: None,
            },
            accounts: accounts.iter().map(|a| AccountRef::new("x", *a)).collect(),
            max_retries: Some(3),
        }
    }

    fn scheduler(publisher: Arc<Scripted>, snapshot: Option<std::path::PathBuf>) -> PostScheduler {
        let config = PostSchedulerConfig {
            snapshot_path: snapshot,
            ..Default::default()
        };
        PostScheduler::new(config, PublisherRegistry::new(600).register(publisher)).unwrap()
    }

    #[tokio::test]
    async fn test_partial_failure_exhausts_retries() {
        let publisher = Arc::new(Scripted::failing("b", u32::MAX));
        let scheduler = scheduler(publisher.clone(), None);
        let id = scheduler.schedule(request(&["a", "b"])).await.unwrap();

        for _ in 0..5 {
            scheduler.tick().await.unwrap();
        }

        let post = scheduler.status(&id).await.unwrap();
        assert_eq!(post.status, PostStatus::Failed);
        assert_eq!(post.retries, 3);
        assert!(post.results["x:a"].success);
        assert!(post.results["x:b"].error.as_deref().unwrap().contains("down"));
        // successful account is not re-published
        assert_eq!(publisher.attempts("a"), 1);
        assert_eq!(publisher.attempts("b"), 3);
    }

    #[tokio::test]
    async fn test_recovers_on_retry() {
        let publisher = Arc::new(Scripted::failing("b", 1));
        let scheduler = scheduler(publisher.clone(), None);
        let id = scheduler.schedule(request(&["a", "b"])).await.unwrap();

        let first = scheduler.tick().await.unwrap();
        assert_eq!(first.retried, 1);
        assert_eq!(scheduler.status(&id).await.unwrap().status, PostStatus::Scheduled);

        let second = scheduler.tick().await.unwrap();
        assert_eq!(second.completed, 1);
        let post = scheduler.status(&id).await.unwrap();
        assert_eq!(post.status, PostStatus::Completed);
        assert_eq!(post.retries, 1);
        assert_eq!(post.results["x:b"].post_url.as_deref(), Some("https://x.test/b"));
    }

    #[tokio::test]
    async fn test_future_posts_wait() {
        let scheduler = scheduler(Arc::new(Scripted::default()), None);
        let mut req = request(&["a"]);
        req.content.scheduled_time = Some(chrono::Utc::now() + chrono::Duration::hours(1));
        let id = scheduler.schedule(req).await.unwrap();

        assert_eq!(scheduler.tick().await.unwrap().processed, 0);
        assert_eq!(scheduler.status(&id).await.unwrap().status, PostStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_cancel_only_while_scheduled() {
        let scheduler = scheduler(Arc::new(Scripted::default()), None);
        let cancelled = scheduler.schedule(request(&["a"])).await.unwrap();
        scheduler.cancel(&cancelled).await.unwrap();

        let published = scheduler.schedule(request(&["a"])).await.unwrap();
        scheduler.tick().await.unwrap();

        assert!(matches!(
            scheduler.cancel(&published).await,
            Err(PostError::NotCancellable {
                status: PostStatus::Completed,
                ..
            })
        ));
        assert!(matches!(scheduler.cancel("nope").await, Err(PostError::NotFound(_))));
        assert_eq!(scheduler.list(Some(PostStatus::Cancelled)).await.len(), 1);
        assert_eq!(scheduler.list(None).await.len(), 2);
    }

    #[tokio::test]
    async fn test_validation() {
        let scheduler = scheduler(Arc::new(Scripted::default()), None);
        assert!(matches!(
            scheduler.schedule(request(&[])).await,
            Err(PostError::Validation(_))
        ));

        let mut unknown = request(&["a"]);
        unknown.accounts = vec![AccountRef::new("myspace", "tom")];
        assert!(matches!(
            scheduler.schedule(unknown).await,
            Err(PostError::Validation(_))
        ));
        assert!(scheduler.list(None).await.is_empty());
    }

    struct Slow;

    #[async_trait]
    impl Publisher for Slow {
        fn platform(&self) -> &str {
            "x"
        }

        async fn publish(
            &self,
            _account: &AccountRef,
            _content: &PostContent,
        ) -> Result<Option<String>, PublishError> {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let scheduler = PostScheduler::new(
            PostSchedulerConfig::default(),
            PublisherRegistry::new(600).register(Arc::new(Slow)),
        )
        .unwrap();
        scheduler.schedule(request(&["a"])).await.unwrap();

        let running = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.tick().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(scheduler.tick().await.is_none());
        assert_eq!(running.await.unwrap().unwrap().completed, 1);
    }

    #[tokio::test]
    async fn test_snapshot_restore() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scheduled_posts.json");

        let id = {
            let scheduler = scheduler(Arc::new(Scripted::failing("a", 1)), Some(path.clone()));
            let id = scheduler.schedule(request(&["a"])).await.unwrap();
            scheduler.tick().await.unwrap();
            scheduler.shutdown().await;
            id
        };

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw.is_array());

        let restored = scheduler(Arc::new(Scripted::default()), Some(path));
        let post = restored.status(&id).await.unwrap();
        assert_eq!(post.status, PostStatus::Scheduled);
        assert_eq!(post.retries, 1);

        restored.tick().await.unwrap();
        assert_eq!(restored.status(&id).await.unwrap().status, PostStatus::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_schedules_all_reach_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scheduled_posts.json");
        let scheduler = scheduler(Arc::new(Scripted::default()), Some(path.clone()));

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let scheduler = scheduler.clone();
                tokio::spawn(async move {
                    scheduler
                        .schedule(request(&[format!("account-{i}").as_str()]))
                        .await
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let on_disk: Vec<ScheduledPost> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.len(), 32);

        let reopened = self::scheduler(Arc::new(Scripted::default()), Some(path));
        assert_eq!(reopened.list(Some(PostStatus::Scheduled)).await.len(), 32);
    }

    #[tokio::test]
    async fn test_unreadable_snapshot_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scheduled_posts.json");
        std::fs::write(&path, "[{\"id\": \"truncated\"").unwrap();

        let scheduler = scheduler(Arc::new(Scripted::default()), Some(path.clone()));
        assert!(scheduler.list(None).await.is_empty());

        scheduler.schedule(request(&["a"])).await.unwrap();
        let on_disk: Vec<ScheduledPost> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.len(), 1);
    }

    #[tokio::test]
    async fn test_no_review_after_shutdown() {
        let publisher = Arc::new(Scripted::default());
        let scheduler = scheduler(publisher.clone(), None);
        let id = scheduler.schedule(request(&["a"])).await.unwrap();

        scheduler.shutdown().await;

        assert!(scheduler.tick().await.is_none());
        assert_eq!(publisher.attempts("a"), 0);
        assert_eq!(scheduler.status(&id).await.unwrap().status, PostStatus::Scheduled);
    }
}
