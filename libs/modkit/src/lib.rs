//! # ModKit - in-process module runtime
//!
//! Discovers feature modules, wires them into a shared service registry,
//! drives their lifecycle and lets them talk over a prioritized event bus.
//!
//! ## Writing a module
//!
//! ```rust,ignore
//! use modkit::{async_trait, Module, ModuleCtx, ModuleFactory, ListenerOptions};
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! pub struct ProjectsModule;
//!
//! #[async_trait]
//! impl Module for ProjectsModule {
//!     async fn initialize(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
//!         ctx.events().on(
//!             "task:created",
//!             |payload| async move {
//!                 tracing::info!(?payload, "task created");
//!                 Ok(())
//!             },
//!             ListenerOptions::new().module(ctx.module_name()).priority(5),
//!         );
//!         Ok(())
//!     }
//! }
//!
//! fn build() -> Arc<dyn Module> {
//!     Arc::new(ProjectsModule)
//! }
//!
//! modkit::inventory::submit! { ModuleFactory::new("projects", build) }
//! ```
//!
//! and ship `modules/projects/module.yaml`:
//!
//! ```yaml
//! name: projects
//! version: 1.0.0
//! dependencies: [task_stats]
//! provides: [projects]
//! ```

use std::any::Any;

pub use anyhow::Result;
pub use async_trait::async_trait;

// Re-export inventory for factory registration
pub use inventory;

pub mod context;
pub mod contracts;
pub mod dependency;
pub mod error;
pub mod events;
pub mod health;
pub mod lifecycle;
pub mod loader;
pub mod registry;
pub mod routing;
pub mod runtime;

pub use context::{ConfigError, ConfigProvider, ModuleContextBuilder, ModuleCtx, NoConfig};
pub use contracts::{Capability, ManagedService, Module, ModuleDescriptor};
pub use dependency::{DependencyGraph, MissingDependency};
pub use error::{ModkitError, ValidationError};
pub use events::{
    EmitOptions, EmitReport, EventBus, EventError, EventMiddleware, EventStats, ListenerId,
    ListenerOptions, ListenerOutcome,
};
pub use health::{HealthEntry, HealthReport, HealthStatus};
pub use lifecycle::{LifecycleError, ModuleHandle, ModuleRecord, ModuleStatus, Phase};
pub use loader::{
    DiscoveredModule, LoadReport, LoaderError, ModuleCatalog, ModuleFactory, ModuleLoader,
};
pub use registry::{RegisterOptions, RegistryError, ServiceRegistry};
pub use routing::RouterHandle;
pub use runtime::{run, ModuleRuntime, PhaseSummary, RunOptions, ShutdownOptions};

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
