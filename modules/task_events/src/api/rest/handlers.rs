use std::sync::Arc;

use axum::extract::{Extension, Query};
use axum::Json;
use modkit::ServiceRegistry;
use tracing::debug;

use crate::api::rest::dto::{RecentActivityDto, RecentQuery};
use crate::api::rest::error::ApiError;
use crate::domain::model::TaskStats;
use crate::domain::service::TaskStatsService;
use crate::module::STATS_SERVICE;

// Resolved per request so a reloaded module serves its fresh service.
fn stats_service(registry: &ServiceRegistry) -> Result<Arc<TaskStatsService>, ApiError> {
    Ok(registry.get::<TaskStatsService>(STATS_SERVICE)?)
}

pub async fn get_stats(
    Extension(registry): Extension<Arc<ServiceRegistry>>,
) -> Result<Json<TaskStats>, ApiError> {
    let svc = stats_service(&registry)?;
    Ok(Json(svc.stats()))
}

pub async fn get_recent(
    Extension(registry): Extension<Arc<ServiceRegistry>>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<RecentActivityDto>, ApiError> {
    let svc = stats_service(&registry)?;
    debug!(limit = ?query.limit, "Listing recent task activity");
    Ok(Json(RecentActivityDto {
        capacity: svc.max_recent(),
        items: svc.recent(query.limit),
    }))
}
