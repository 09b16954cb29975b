use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use modkit::RegistryError;
use serde_json::json;

/// JSON error body returned by the task_events routes.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

// The stats service disappears while the module is reloading.
impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
