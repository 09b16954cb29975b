use std::sync::Arc;

use axum::routing::get;
use axum::{Extension, Router};
use modkit::ServiceRegistry;

use crate::api::rest::handlers;

/// `GET /stats` and `GET /recent?limit=N`, mounted under the module prefix.
pub fn router(registry: Arc<ServiceRegistry>) -> Router {
    Router::new()
        .route("/stats", get(handlers::get_stats))
        .route("/recent", get(handlers::get_recent))
        .layer(Extension(registry))
}
