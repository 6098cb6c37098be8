//! Video job scenarios
//!
//! Offline rendering degrades media and narration to local stages while the
//! job itself still completes.

use reelforge::app::AppContext;
use reelforge::jobs::{JobEvent, JobStatus, VideoJobRequest};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use crate::common::{config_in, FakeEncoder};

async fn wait_for_outcome(
    events: &mut tokio::sync::broadcast::Receiver<JobEvent>,
    id: &str,
) -> JobEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(event @ (JobEvent::Completed { .. } | JobEvent::Failed { .. }))
                    if event.job_id() == id =>
                {
                    return event;
                }
                Ok(_) => continue,
                Err(e) => panic!("event stream ended: {e}"),
            }
        }
    })
    .await
    .expect("job did not finish in time")
}

#[tokio::test]
async fn test_offline_render_completes_with_fallbacks() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let media_dir = config.storage.media_dir();
    let snapshot = config.storage.jobs_snapshot();

    let encoder = Arc::new(FakeEncoder::default());
    let app = AppContext::builder(config)
        .encoder(encoder.clone())
        .build()
        .unwrap();

    let mut events = app.jobs().subscribe();
    app.start();
    let id = app
        .jobs()
        .submit(VideoJobRequest::new("Coffee hacks").with_script("Grind right before brewing."))
        .await
        .unwrap();

    match wait_for_outcome(&mut events, &id).await {
        JobEvent::Completed { video_url, .. } => {
            assert!(video_url.contains("/videos/"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let job = app.jobs().status(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert!(job.thumbnail_url.is_some());
    assert!(job.fallbacks.iter().any(|f| f.starts_with("media:")));
    assert!(job.fallbacks.iter().any(|f| f.starts_with("tts:")));

    assert_eq!(encoder.calls.load(Ordering::SeqCst), 1);
    assert!(encoder.last_image_count.load(Ordering::SeqCst) > 0);

    app.shutdown_with_grace(Duration::from_secs(1)).await;

    let stored = std::fs::read_dir(media_dir.join("videos")).unwrap().count();
    assert_eq!(stored, 1);
    let mirrored = std::fs::read_to_string(snapshot).unwrap();
    assert!(mirrored.contains(&id));
}

#[tokio::test]
async fn test_supplied_images_skip_stock_media() {
    let dir = TempDir::new().unwrap();
    let image = dir.path().join("frame.ppm");
    std::fs::write(&image, b"P6\n2 2\n255\n000000000000").unwrap();

    let encoder = Arc::new(FakeEncoder::default());
    let app = AppContext::builder(config_in(&dir))
        .encoder(encoder.clone())
        .build()
        .unwrap();

    let mut events = app.jobs().subscribe();
    app.start();
    let id = app
        .jobs()
        .submit(VideoJobRequest::new("Own frames").with_images(vec![image]))
        .await
        .unwrap();

    assert!(matches!(
        wait_for_outcome(&mut events, &id).await,
        JobEvent::Completed { .. }
    ));
    let job = app.jobs().status(&id).await.unwrap();
    assert!(!job.fallbacks.iter().any(|f| f.starts_with("media:")));
    assert_eq!(encoder.last_image_count.load(Ordering::SeqCst), 1);

    app.shutdown_with_grace(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_submit_rejected_after_shutdown() {
    let dir = TempDir::new().unwrap();
    let app = AppContext::builder(config_in(&dir))
        .encoder(Arc::new(FakeEncoder::default()))
        .build()
        .unwrap();

    app.start();
    app.shutdown_with_grace(Duration::from_millis(100)).await;

    let result = app.jobs().submit(VideoJobRequest::new("Too late")).await;
    assert!(result.is_err());
}
