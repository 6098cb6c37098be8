//! Post publication scenarios
//!
//! 1. Immediate posts publish on the next review pass
//! 2. A flaky platform is retried until it succeeds
//! 3. Scheduled posts survive a restart
//! 4. Webhook fallback for platforms without a publisher

use chrono::{Duration as ChronoDuration, Utc};
use reelforge::app::AppContext;
use reelforge::posts::{AccountRef, PostContent, PostRequest, PostStatus};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{config_in, RecordingPublisher};

fn request(accounts: &[(&str, &str)]) -> PostRequest {
    PostRequest {
        content: PostContent {
            text: "New video is up".to_string(),
            media_ref: "https://cdn.test/v.mp4".to_string(),
            hashtags: vec!["#coffee".to_string()],
            scheduled_time: None,
        },
        accounts: accounts
            .iter()
            .map(|(platform, id)| AccountRef::new(*platform, *id))
            .collect(),
        max_retries: Some(3),
    }
}

#[tokio::test]
async fn test_publishes_to_every_account() {
    let dir = TempDir::new().unwrap();
    let publisher = Arc::new(RecordingPublisher::new("instagram"));
    let app = AppContext::builder(config_in(&dir))
        .publisher(publisher.clone())
        .build()
        .unwrap();

    let id = app
        .posts()
        .schedule(request(&[("instagram", "main"), ("instagram", "backup")]))
        .await
        .unwrap();

    let report = app.posts().tick().await.unwrap();
    assert_eq!(report.completed, 1);

    let post = app.posts().status(&id).await.unwrap();
    assert_eq!(post.status, PostStatus::Completed);
    assert_eq!(post.results.len(), 2);
    assert!(post.results.values().all(|r| r.success));
    assert_eq!(publisher.published(), vec!["main", "backup"]);
}

#[tokio::test]
async fn test_flaky_platform_is_retried() {
    let dir = TempDir::new().unwrap();
    let publisher = Arc::new(RecordingPublisher::flaky("tiktok", 1));
    let app = AppContext::builder(config_in(&dir))
        .publisher(publisher.clone())
        .build()
        .unwrap();

    let id = app
        .posts()
        .schedule(request(&[("tiktok", "creator")]))
        .await
        .unwrap();

    let first = app.posts().tick().await.unwrap();
    assert_eq!(first.retried, 1);
    let post = app.posts().status(&id).await.unwrap();
    assert_eq!(post.status, PostStatus::Scheduled);
    assert_eq!(post.retries, 1);

    let second = app.posts().tick().await.unwrap();
    assert_eq!(second.completed, 1);
    assert_eq!(publisher.published(), vec!["creator"]);
}

#[tokio::test]
async fn test_future_post_survives_restart() {
    let dir = TempDir::new().unwrap();
    let mut scheduled = request(&[("instagram", "main")]);
    scheduled.content.scheduled_time = Some(Utc::now() + ChronoDuration::hours(2));

    let id = {
        let app = AppContext::builder(config_in(&dir))
            .publisher(Arc::new(RecordingPublisher::new("instagram")))
            .build()
            .unwrap();
        let id = app.posts().schedule(scheduled).await.unwrap();

        let report = app.posts().tick().await.unwrap();
        assert_eq!(report.processed, 0);
        app.posts().shutdown().await;
        id
    };

    let restarted = AppContext::builder(config_in(&dir))
        .publisher(Arc::new(RecordingPublisher::new("instagram")))
        .build()
        .unwrap();
    let post = restarted.posts().status(&id).await.unwrap();
    assert_eq!(post.status, PostStatus::Scheduled);
    assert_eq!(restarted.posts().list(Some(PostStatus::Scheduled)).await.len(), 1);

    restarted.posts().cancel(&id).await.unwrap();
    let post = restarted.posts().status(&id).await.unwrap();
    assert_eq!(post.status, PostStatus::Cancelled);
}

#[tokio::test]
async fn test_webhook_fallback_publishes_unknown_platform() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"url": "https://social.test/p/1"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.providers.webhook_url = Some(format!("{}/hook", server.uri()));
    let app = AppContext::new(config).unwrap();

    let id = app
        .posts()
        .schedule(request(&[("youtube", "channel")]))
        .await
        .unwrap();
    app.posts().tick().await.unwrap();

    let post = app.posts().status(&id).await.unwrap();
    assert_eq!(post.status, PostStatus::Completed);
    let result = post.results.get("youtube:channel").unwrap();
    assert_eq!(result.post_url.as_deref(), Some("https://social.test/p/1"));
}
