use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("malformed '{event}' payload: {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DomainError {
    pub fn invalid_payload(event: &str, source: serde_json::Error) -> Self {
        Self::InvalidPayload {
            event: event.to_string(),
            source,
        }
    }
}
