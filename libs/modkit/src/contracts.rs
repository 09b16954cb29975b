use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::ModuleCtx;
use crate::error::ValidationError;
use crate::lifecycle::Phase;

/// Feature module: a capability set driven through the lifecycle by the runtime.
///
/// Only `initialize` is mandatory. `start`/`stop` default to no-ops (the runtime
/// still stamps their timestamps), `health` defaults to "report my lifecycle
/// status", `reset` keeps no state to drop and `handle_error` defaults to a
/// warning log.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// Wire the module: resolve required services, subscribe to events,
    /// expose own services and attach routes. Fail fast if a required
    /// service is absent.
    async fn initialize(&self, ctx: &ModuleCtx) -> anyhow::Result<()>;

    async fn start(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    /// `Ok(None)` means "use the record status".
    async fn health(&self) -> anyhow::Result<Option<serde_json::Value>> {
        Ok(None)
    }

    /// Drop internal state before the record returns to `registered`.
    fn reset(&self) {}

    /// Called after a lifecycle hook failed and the record moved to `error`.
    fn handle_error(&self, phase: Phase, err: &anyhow::Error) {
        tracing::warn!(phase = %phase, error = %err, "Module lifecycle hook failed");
    }
}

/// Service placed in the registry that wants to take part in health checks
/// and orderly shutdown.
#[async_trait]
pub trait ManagedService: Send + Sync + 'static {
    async fn health_check(&self) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({ "status": "healthy" }))
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Feature tags a module can advertise. Advisory only: nothing gates on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Tasks,
    Projects,
    Team,
    Messaging,
    Analytics,
    Notifications,
    Auth,
    Storage,
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Capability::Tasks,
        Capability::Projects,
        Capability::Team,
        Capability::Messaging,
        Capability::Analytics,
        Capability::Notifications,
        Capability::Auth,
        Capability::Storage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Tasks => "tasks",
            Capability::Projects => "projects",
            Capability::Team => "team",
            Capability::Messaging => "messaging",
            Capability::Analytics => "analytics",
            Capability::Notifications => "notifications",
            Capability::Auth => "auth",
            Capability::Storage => "storage",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a capability tag is not one of [`Capability::ALL`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCapability(pub String);

impl FromStr for Capability {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == tag)
            .ok_or_else(|| UnknownCapability(s.to_string()))
    }
}

/// Raw module description handed to the runtime, either built in code or
/// produced by the loader from a manifest.
#[derive(Clone, Default)]
pub struct ModuleDescriptor {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Names of services the module expects to find in the registry.
    pub dependencies: Vec<String>,
    pub provides: Vec<Capability>,
    /// The lifecycle implementation; `None` means no `initialize` capability.
    pub module: Option<Arc<dyn Module>>,
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("description", &self.description)
            .field("dependencies", &self.dependencies)
            .field("provides", &self.provides)
            .field("has_module", &self.module.is_some())
            .finish()
    }
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn depends_on(mut self, service: impl Into<String>) -> Self {
        self.dependencies.push(service.into());
        self
    }

    pub fn provides(mut self, capability: Capability) -> Self {
        if !self.provides.contains(&capability) {
            self.provides.push(capability);
        }
        self
    }

    pub fn with_module(mut self, module: Arc<dyn Module>) -> Self {
        self.module = Some(module);
        self
    }

    /// Mandatory fields that are absent or blank, in contract order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.name.trim().is_empty() {
            missing.push("name");
        }
        if self.version.trim().is_empty() {
            missing.push("version");
        }
        if self.module.is_none() {
            missing.push("initialize");
        }
        missing
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let missing = self.missing_fields();
        if missing.is_empty() {
            return Ok(());
        }
        let module = if self.name.trim().is_empty() {
            "<unnamed>".to_string()
        } else {
            self.name.clone()
        };
        Err(ValidationError::MissingFields { module, missing })
    }
}
