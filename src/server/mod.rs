//! Health and metrics HTTP endpoints
//!
//! | Route           | Answer                                               |
//! |-----------------|------------------------------------------------------|
//! | `/health/live`  | 200 while the process runs                           |
//! | `/health/ready` | 200 when the system is healthy, 503 otherwise        |
//! | `/health`       | full [`SystemStatus`] plus scheduler counters        |
//! | `/metrics`      | Prometheus text format                               |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use thiserror::Error;
use tower_http::trace::TraceLayer;

use crate::app::AppContext;
use crate::jobs::JobScheduler;
use crate::posts::{PostScheduler, PostStatus};
use crate::resilience::{ResilienceMonitor, SystemStatus};

// ============================================================================
// Health Status Types
// ============================================================================

/// Overall health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Critical services are fine, some optional one is not
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Classify a monitor snapshot
    pub fn of(status: &SystemStatus) -> Self {
        if !status.system_healthy {
            HealthStatus::Unhealthy
        } else if status
            .services
            .iter()
            .any(|s| s.total_attempts > 0 && !s.is_healthy)
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Component health check result
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: HealthStatus,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: HealthStatus,
    pub timestamp: String,
    pub checks: Vec<ComponentHealth>,
}

/// Queue counters reported next to probe statistics
#[derive(Debug, Serialize)]
pub struct SchedulerSummary {
    pub active_workers: usize,
    pub max_concurrent_workers: usize,
    pub queued_jobs: usize,
    pub scheduled_posts: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_secs: u64,
    pub schedulers: SchedulerSummary,
    pub system: SystemStatus,
}

// ============================================================================
// Server
// ============================================================================

/// Shared handler state
#[derive(Clone)]
pub struct ServerState {
    pub monitor: Arc<ResilienceMonitor>,
    pub jobs: JobScheduler,
    pub posts: PostScheduler,
    pub start_time: Instant,
}

impl ServerState {
    pub fn from_app(app: &AppContext) -> Self {
        Self {
            monitor: Arc::clone(app.monitor()),
            jobs: app.jobs().clone(),
            posts: app.posts().clone(),
            start_time: Instant::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Build the router with request tracing
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown_signal` resolves
pub async fn serve(
    addr: SocketAddr,
    state: ServerState,
    shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    tracing::info!(%addr, "Health server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(ServerError::Serve)?;

    tracing::info!("Health server stopped");
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn liveness_probe() -> impl IntoResponse {
    let response = LivenessResponse {
        status: HealthStatus::Healthy,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    (StatusCode::OK, Json(response))
}

/// 503 unless the mean success rate of critical services clears the threshold
async fn readiness_probe(State(state): State<ServerState>) -> impl IntoResponse {
    let system = state.monitor.get_status();
    let checks = system
        .services
        .iter()
        .filter(|s| s.critical)
        .map(|s| ComponentHealth {
            name: s.service.clone(),
            status: match (s.total_attempts, s.is_healthy) {
                (0, _) | (_, true) => HealthStatus::Healthy,
                (_, false) => HealthStatus::Unhealthy,
            },
            message: s.last_error.clone(),
            latency_ms: (s.total_attempts > 0).then_some(s.avg_response_time_ms.round() as u64),
        })
        .collect();

    let status = if system.system_healthy {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    };
    let response = ReadinessResponse {
        status,
        timestamp: chrono::Utc::now().to_rfc3339(),
        checks,
    };
    (status.status_code(), Json(response))
}

async fn health_check(State(state): State<ServerState>) -> impl IntoResponse {
    let system = state.monitor.get_status();
    let status = HealthStatus::of(&system);
    let schedulers = SchedulerSummary {
        active_workers: state.jobs.active_workers(),
        max_concurrent_workers: state.jobs.max_concurrent_workers(),
        queued_jobs: state.jobs.queue_len().await,
        scheduled_posts: state.posts.list(Some(PostStatus::Scheduled)).await.len(),
    };

    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        schedulers,
        system,
    };
    (status.status_code(), Json(response))
}

async fn metrics() -> impl IntoResponse {
    match crate::metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                e.to_string(),
            )
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::resilience::ResilienceRecord;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app_in(dir: &TempDir) -> AppContext {
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();
        AppContext::new(config).unwrap()
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
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

    fn failure(service: &str) -> ResilienceRecord {
        ResilienceRecord {
            service: service.to_string(),
            success: false,
            response_time_ms: 12,
            fallback_used: false,
            fallback_service: None,
            error_message: Some("disk full".to_string()),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_health_status_code() {
        assert_eq!(HealthStatus::Healthy.status_code(), StatusCode::OK);
        assert_eq!(HealthStatus::Degraded.status_code(), StatusCode::OK);
        assert_eq!(
            HealthStatus::Unhealthy.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_liveness() {
        let dir = TempDir::new().unwrap();
        let app = app_in(&dir);
        let (status, body) = get_json(router(ServerState::from_app(&app)), "/health/live").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_readiness_follows_system_health() {
        let dir = TempDir::new().unwrap();
        let app = app_in(&dir);
        let state = ServerState::from_app(&app);

        let (status, _) = get_json(router(state.clone()), "/health/ready").await;
        assert_eq!(status, StatusCode::OK);

        app.monitor().append(failure("storage"));
        let (status, body) = get_json(router(state), "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let checks = body["checks"].as_array().unwrap();
        let storage = checks.iter().find(|c| c["name"] == "storage").unwrap();
        assert_eq!(storage["status"], "unhealthy");
        assert_eq!(storage["message"], "disk full");
    }

    #[tokio::test]
    async fn test_full_health_report() {
        let dir = TempDir::new().unwrap();
        let app = app_in(&dir);
        let (status, body) = get_json(router(ServerState::from_app(&app)), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["schedulers"]["max_concurrent_workers"], 2);
        assert_eq!(body["system"]["system_healthy"], true);
        assert!(body["system"]["services"].as_array().unwrap().len() >= 2);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let _ = crate::metrics::init_metrics();
        let dir = TempDir::new().unwrap();
        let app = app_in(&dir);
        let response = router(ServerState::from_app(&app))
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
