//! Debug HTTP server: Prometheus metrics and lifecycle state.
//!
//! - `GET /metrics`: every metric in the process [`MetricsScope`]
//! - `GET /health`: the lifecycle state; `200` while serving, `503` otherwise

use crate::server::lifecycle::{Lifecycle, LifecycleState};
use anyhow::Context;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use sa_core::MetricsScope;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Clone)]
struct DebugState {
    metrics: MetricsScope,
    lifecycle: Lifecycle,
}

pub fn router(metrics: MetricsScope, lifecycle: Lifecycle) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(DebugState { metrics, lifecycle })
}

async fn metrics_handler(State(state): State<DebugState>) -> String {
    state.metrics.render()
}

async fn health_handler(State(state): State<DebugState>) -> (StatusCode, &'static str) {
    let lifecycle = state.lifecycle.state();
    let code = match lifecycle {
        LifecycleState::Serving => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, lifecycle.as_str())
}

pub async fn bind(addr: &str) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding debug server on {addr}"))
}

/// Serves `router` on `listener` until `shutdown` is cancelled.
pub fn spawn(
    listener: TcpListener,
    router: Router,
    tracker: &TaskTracker,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tracker.spawn(async move {
        let res = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;
        if let Err(e) = res {
            tracing::error!("Debug server failed: {e}");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_path(router: Router, path: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn metrics_are_rendered() {
        let scope = MetricsScope::new().unwrap();
        scope
            .gauge("max_db_connections", "Maximum number of DB connections allowed.")
            .unwrap()
            .set(10.0);

        let (status, body) = get_path(router(scope, Lifecycle::new()), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("max_db_connections 10"), "{body}");
    }

    #[tokio::test]
    async fn health_follows_the_lifecycle() {
        let scope = MetricsScope::new().unwrap();
        let lifecycle = Lifecycle::new();
        let app = router(scope, lifecycle.clone());

        assert_eq!(
            get_path(app.clone(), "/health").await,
            (StatusCode::SERVICE_UNAVAILABLE, "initializing".to_string())
        );

        lifecycle.advance(LifecycleState::Serving);
        assert_eq!(
            get_path(app.clone(), "/health").await,
            (StatusCode::OK, "serving".to_string())
        );

        lifecycle.begin_drain();
        assert_eq!(
            get_path(app, "/health").await,
            (StatusCode::SERVICE_UNAVAILABLE, "draining".to_string())
        );
    }

    #[tokio::test]
    async fn stops_on_cancellation() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let tracker = TaskTracker::new();
        let shutdown = CancellationToken::new();
        let handle = spawn(
            listener,
            router(MetricsScope::new().unwrap(), Lifecycle::new()),
            &tracker,
            shutdown.clone(),
        );

        shutdown.cancel();
        handle.await.unwrap();
    }
}
