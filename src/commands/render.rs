use anyhow::{bail, Result};
use tokio::sync::broadcast::error::RecvError;

use reelforge::app::AppContext;
use reelforge::jobs::{JobEvent, VideoJobRequest};

/// Submit one job, follow its events and wait for the outcome
pub async fn render(app: &AppContext, request: VideoJobRequest) -> Result<()> {
    let mut events = app.jobs().subscribe();
    app.start();
    let id = app.jobs().submit(request).await?;
    println!("Job {id} queued");

    let outcome = loop {
        match events.recv().await {
            Ok(event) if event.job_id() != id => continue,
            Ok(JobEvent::Progress { stage, progress, .. }) => {
                println!("  {progress:>3}%  {stage:?}");
            }
            Ok(JobEvent::Completed { video_url, .. }) => break Ok(video_url),
            Ok(JobEvent::Failed { error, .. }) => break Err(error),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event receiver lagged");
            }
            Err(RecvError::Closed) => break Err("event stream closed".to_string()),
        }
    };

    let job = app.jobs().status(&id).await?;
    app.shutdown().await;

    match outcome {
        Ok(video_url) => {
            println!("Video: {video_url}");
            if let Some(thumbnail) = job.thumbnail_url {
                println!("Thumbnail: {thumbnail}");
            }
            if !job.fallbacks.is_empty() {
                println!("Fallbacks: {}", job.fallbacks.join(", "));
            }
            Ok(())
        }
        Err(error) => bail!("job {id} failed: {error}"),
    }
}
