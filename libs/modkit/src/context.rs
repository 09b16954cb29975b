//! Per-module context handed to lifecycle hooks.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::events::{EmitOptions, EventBus};
use crate::registry::ServiceRegistry;
use crate::routing::RouterHandle;

/// Source of raw per-module configuration sections.
pub trait ConfigProvider: Send + Sync {
    fn get_module_config(&self, module_name: &str) -> Option<&Value>;
}

/// Provider with no module sections at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoConfig;

impl ConfigProvider for NoConfig {
    fn get_module_config(&self, _module_name: &str) -> Option<&Value> {
        None
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration for module '{module}'")]
    Invalid {
        module: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything a module may touch while it runs. Cheap to clone.
#[derive(Clone)]
pub struct ModuleCtx {
    module_name: Arc<str>,
    registry: Arc<ServiceRegistry>,
    events: EventBus,
    router: RouterHandle,
    options: Option<Value>,
    cancel: CancellationToken,
}

impl ModuleCtx {
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Routing surface the module attaches its own routes to.
    pub fn router(&self) -> &RouterHandle {
        &self.router
    }

    /// Raw configuration section for this module, if any.
    pub fn options(&self) -> Option<&Value> {
        self.options.as_ref()
    }

    /// Typed configuration; a module without a section gets `T::default()`.
    pub fn config<T: DeserializeOwned + Default>(&self) -> Result<T, ConfigError> {
        match &self.options {
            None | Some(Value::Null) => Ok(T::default()),
            Some(raw) => {
                serde_json::from_value(raw.clone()).map_err(|source| ConfigError::Invalid {
                    module: self.module_name.to_string(),
                    source,
                })
            }
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fire-and-forget emission attributed to this module.
    pub fn publish(&self, event: &str, payload: Value) {
        self.events.publish_with(
            event,
            payload,
            EmitOptions::default().from_module(self.module_name.as_ref()),
        );
    }
}

/// Builds [`ModuleCtx`] values that share the runtime's registry, bus and router.
#[derive(Clone)]
pub struct ModuleContextBuilder {
    config: Arc<dyn ConfigProvider>,
    registry: Arc<ServiceRegistry>,
    events: EventBus,
    router: RouterHandle,
    cancel: CancellationToken,
}

impl ModuleContextBuilder {
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        registry: Arc<ServiceRegistry>,
        events: EventBus,
        router: RouterHandle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            registry,
            events,
            router,
            cancel,
        }
    }

    pub fn for_module(&self, module_name: &str) -> ModuleCtx {
        ModuleCtx {
            module_name: Arc::from(module_name),
            registry: Arc::clone(&self.registry),
            events: self.events.clone(),
            router: self.router.clone(),
            options: self.config.get_module_config(module_name).cloned(),
            cancel: self.cancel.child_token(),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_ctx(module_name: &str) -> ModuleCtx {
    ModuleContextBuilder::new(
        Arc::new(NoConfig),
        Arc::new(ServiceRegistry::new()),
        EventBus::new(),
        RouterHandle::new(),
        CancellationToken::new(),
    )
    .for_module(module_name)
}
