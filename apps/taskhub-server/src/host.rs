//! HTTP host: module routes plus the operator endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::FutureExt;
use modkit::health::HealthStatus;
use modkit::runtime::HostFn;
use modkit::ModuleRuntime;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// `GET /healthz` (503 when every probe failed) and `GET /status`.
pub fn operator_routes(runtime: Arc<ModuleRuntime>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .with_state(runtime)
}

async fn healthz(State(runtime): State<Arc<ModuleRuntime>>) -> impl IntoResponse {
    let report = runtime.health().await;
    let code = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (code, Json(report))
}

async fn status(State(runtime): State<Arc<ModuleRuntime>>) -> impl IntoResponse {
    Json(runtime.diagnostics())
}

/// Host for [`modkit::run`]: binds `addr` and serves until cancelled.
pub fn http_host(addr: SocketAddr, runtime: Arc<ModuleRuntime>) -> HostFn {
    Box::new(move |modules: Router, cancel: CancellationToken| {
        serve(addr, modules.merge(operator_routes(runtime)), cancel).boxed()
    })
}

async fn serve(addr: SocketAddr, router: Router, cancel: CancellationToken) -> anyhow::Result<()> {
    let router = router.layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP server bound");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            tracing::info!("HTTP server shutting down gracefully");
        })
        .await
        .map_err(|e| anyhow::anyhow!(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use modkit::{ManagedService, RegisterOptions};
    use serde_json::Value;
    use tower::ServiceExt;

    struct Down;

    #[modkit::async_trait]
    impl ManagedService for Down {
        async fn health_check(&self) -> anyhow::Result<Value> {
            anyhow::bail!("connection refused")
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let res = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn empty_runtime_is_healthy() {
        let runtime = Arc::new(ModuleRuntime::builder().build());
        let (code, body) = get_json(operator_routes(runtime), "/healthz").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn all_probes_failing_is_unavailable() {
        let runtime = Arc::new(ModuleRuntime::builder().build());
        runtime
            .registry()
            .register_managed("database", Arc::new(Down), RegisterOptions::default());

        let (code, body) = get_json(operator_routes(runtime), "/healthz").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["services"]["database"]["status"], "error");
    }

    #[tokio::test]
    async fn status_lists_services_and_subscriptions() {
        let runtime = Arc::new(ModuleRuntime::builder().build());
        runtime
            .registry()
            .register("mailer", Arc::new(()), RegisterOptions::default());
        runtime.events().on(
            "task:created",
            |_| async { Ok(()) },
            modkit::ListenerOptions::new(),
        );

        let (code, body) = get_json(operator_routes(runtime), "/status").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["subscriptions"]["task:created"], 1);
        assert_eq!(body["services"][0]["name"], "mailer");
    }
}
