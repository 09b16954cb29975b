//! Error taxonomy of the module runtime.
//!
//! Each concern owns a structured error (`ValidationError`, `RegistryError`,
//! `LoaderError`, `LifecycleError`, `EventError`); `ModkitError` is the
//! umbrella callers get from single-target runtime operations.

use thiserror::Error;

pub use crate::events::EventError;
pub use crate::lifecycle::LifecycleError;
pub use crate::loader::LoaderError;
pub use crate::registry::RegistryError;

/// A module descriptor or manifest that does not satisfy the module contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("module '{module}' is missing required fields: {}", missing.join(", "))]
    MissingFields {
        module: String,
        missing: Vec<&'static str>,
    },
    #[error("module '{module}' declares unknown capability '{tag}'")]
    UnknownCapability { module: String, tag: String },
    #[error("module '{0}' is already registered")]
    Duplicate(String),
    #[error("invalid manifest for module '{module}': {reason}")]
    Manifest { module: String, reason: String },
}

impl ValidationError {
    /// Fields reported missing, empty for the other variants.
    pub fn missing_fields(&self) -> &[&'static str] {
        match self {
            ValidationError::MissingFields { missing, .. } => missing,
            _ => &[],
        }
    }
}

/// Umbrella error for runtime operations that surface failures to their caller.
#[derive(Debug, Error)]
pub enum ModkitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Event(#[from] EventError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Loader(#[from] LoaderError),
}
