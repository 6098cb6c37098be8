//! Resilience scenarios
//!
//! Probing through the application context, health classification over HTTP
//! and statistics carried across restarts.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use reelforge::app::AppContext;
use reelforge::server::{self, ServerState};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use crate::common::{config_in, FakeEncoder};

/// Webhook pointed at a closed port; storage probed in the temp dir
fn degraded_app(dir: &TempDir) -> AppContext {
    let mut config = config_in(dir);
    config.providers.webhook_url = Some("http://127.0.0.1:9/hook".to_string());
    config.resilience.probe_timeout_secs = 2;
    AppContext::builder(config)
        .encoder(Arc::new(FakeEncoder::default()))
        .build()
        .unwrap()
}

async fn get(app: &AppContext, uri: &str) -> (StatusCode, serde_json::Value) {
    let router = server::router(ServerState::from_app(app));
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_optional_outage_degrades_but_stays_ready() {
    let dir = TempDir::new().unwrap();
    let app = degraded_app(&dir);

    app.monitor().run_all().await;
    let status = app.monitor().get_status();
    assert!(status.system_healthy);

    let storage = status.service("storage").unwrap();
    assert!(storage.critical);
    assert!(storage.is_healthy);
    let webhook = status.service("webhook").unwrap();
    assert!(!webhook.critical);
    assert!(!webhook.is_available);

    let (code, body) = get(&app, "/health/ready").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (code, body) = get(&app, "/health").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
}

#[tokio::test]
async fn test_statistics_survive_restart() {
    let dir = TempDir::new().unwrap();
    {
        let app = degraded_app(&dir);
        app.monitor().run_all().await;
        app.monitor().run("storage").await.unwrap();
        app.shutdown_with_grace(Duration::from_millis(100)).await;
    }

    let restarted = degraded_app(&dir);
    let status = restarted.monitor().get_status();
    let storage = status.service("storage").unwrap();
    assert_eq!(storage.total_attempts, 2);
    assert_eq!(storage.success_rate, 1.0);
    assert!(status.service("webhook").unwrap().last_error.is_some());
}

#[tokio::test]
async fn test_unknown_service_is_not_probed() {
    let dir = TempDir::new().unwrap();
    let app = degraded_app(&dir);
    assert!(app.monitor().run("nonexistent").await.is_none());
}
