use std::collections::HashMap;
use std::sync::Arc;

use crate::contracts::Module;

/// A compiled-in module factory, submitted with `inventory::submit!`:
///
/// ```rust,ignore
/// fn build() -> Arc<dyn Module> { Arc::new(TaskEventsModule::default()) }
/// inventory::submit! { ModuleFactory::new("task_events", build) }
/// ```
pub struct ModuleFactory {
    pub key: &'static str,
    pub build: fn() -> Arc<dyn Module>,
}

impl ModuleFactory {
    pub const fn new(key: &'static str, build: fn() -> Arc<dyn Module>) -> Self {
        Self { key, build }
    }
}

inventory::collect!(ModuleFactory);

type BuildFn = Arc<dyn Fn() -> Arc<dyn Module> + Send + Sync>;

/// Entry-key → factory table the loader resolves manifests against.
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    factories: HashMap<String, BuildFn>,
}

impl std::fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCatalog")
            .field("keys", &self.keys())
            .finish()
    }
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of every factory linked into the binary.
    pub fn discover() -> Self {
        let mut catalog = Self::new();
        for factory in inventory::iter::<ModuleFactory> {
            let build = factory.build;
            catalog.register(factory.key, move || build());
        }
        tracing::debug!(factories = ?catalog.keys(), "Module catalog discovered");
        catalog
    }

    pub fn register<F>(&mut self, key: &str, build: F)
    where
        F: Fn() -> Arc<dyn Module> + Send + Sync + 'static,
    {
        if self.factories.insert(key.to_string(), Arc::new(build)).is_some() {
            tracing::warn!(key, "Module factory registered twice; keeping the last one");
        }
    }

    pub fn with_factory<F>(mut self, key: &str, build: F) -> Self
    where
        F: Fn() -> Arc<dyn Module> + Send + Sync + 'static,
    {
        self.register(key, build);
        self
    }

    /// A fresh module instance for `key`, or `None` when nothing is registered.
    pub fn build(&self, key: &str) -> Option<Arc<dyn Module>> {
        self.factories.get(key).map(|build| build())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.factories.keys().cloned().collect();
        keys.sort();
        keys
    }
}
