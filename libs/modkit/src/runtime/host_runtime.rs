//! Module runtime - drives registered modules through their lifecycle.
//!
//! Phases: bootstrap (load + register + advisory dependency check) → init →
//! start → wait → stop → service shutdown. Bulk phases never fail; a module
//! whose hook fails is left in `error` and reported in the [`PhaseSummary`].

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::context::{ConfigProvider, ModuleContextBuilder, ModuleCtx, NoConfig};
use crate::contracts::ModuleDescriptor;
use crate::dependency::DependencyGraph;
use crate::error::{ModkitError, ValidationError};
use crate::events::{EmitOptions, EventBus};
use crate::health::{HealthEntry, HealthReport};
use crate::lifecycle::{ModuleHandle, ModuleStatus, Phase};
use crate::loader::{LoadFailure, LoadReport, LoaderError, ModuleLoader};
use crate::registry::ServiceRegistry;
use crate::routing::RouterHandle;
use crate::runtime::diagnostics::{DependencyReport, RuntimeDiagnostics};

pub const RUNTIME_STARTED: &str = "runtime:started";
pub const RUNTIME_STOPPING: &str = "runtime:stopping";
const RUNTIME_SOURCE: &str = "runtime";

/// Result of one bulk lifecycle pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseSummary {
    pub phase: Phase,
    pub succeeded: Vec<String>,
    /// `(module, error)` pairs.
    pub failed: Vec<(String, String)>,
    /// Modules not in the status this phase starts from.
    pub skipped: Vec<String>,
}

impl PhaseSummary {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownSummary {
    pub stop: PhaseSummary,
    pub failed_services: Vec<String>,
}

pub struct RuntimeBuilder {
    config: Arc<dyn ConfigProvider>,
    registry: Option<Arc<ServiceRegistry>>,
    events: Option<EventBus>,
    loader: Option<ModuleLoader>,
    cancel: Option<CancellationToken>,
}

impl RuntimeBuilder {
    pub fn config(mut self, config: Arc<dyn ConfigProvider>) -> Self {
        self.config = config;
        self
    }

    pub fn registry(mut self, registry: Arc<ServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn loader(mut self, loader: ModuleLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> ModuleRuntime {
        let registry = self.registry.unwrap_or_default();
        let events = self.events.unwrap_or_default();
        let router = RouterHandle::new();
        let cancel = self.cancel.unwrap_or_default();
        let ctx_builder = ModuleContextBuilder::new(
            self.config,
            Arc::clone(&registry),
            events.clone(),
            router.clone(),
            cancel.clone(),
        );
        ModuleRuntime {
            registry,
            events,
            router,
            loader: self.loader,
            ctx_builder,
            cancel,
        }
    }
}

/// Owns the registry, bus, routing surface and loader of one process.
pub struct ModuleRuntime {
    registry: Arc<ServiceRegistry>,
    events: EventBus,
    router: RouterHandle,
    loader: Option<ModuleLoader>,
    ctx_builder: ModuleContextBuilder,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ModuleRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRuntime")
            .field("registry", &self.registry)
            .field("loader", &self.loader)
            .finish_non_exhaustive()
    }
}

impl ModuleRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder {
            config: Arc::new(NoConfig),
            registry: None,
            events: None,
            loader: None,
            cancel: None,
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn router(&self) -> &RouterHandle {
        &self.router
    }

    pub fn loader(&self) -> Option<&ModuleLoader> {
        self.loader.as_ref()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn context_for(&self, module: &str) -> ModuleCtx {
        self.ctx_builder.for_module(module)
    }

    pub fn register(&self, descriptor: ModuleDescriptor) -> Result<Arc<ModuleHandle>, ValidationError> {
        let handle = self.registry.register_module(descriptor)?;
        let record = handle.snapshot();
        tracing::info!(module = %record.name, version = %record.version, "Module registered");
        Ok(handle)
    }

    /// Load everything under the modules root and register what loaded.
    /// Per-module failures end up in the returned report.
    pub async fn bootstrap(&self) -> Result<LoadReport, ModkitError> {
        tracing::info!("Phase: bootstrap");
        let Some(loader) = &self.loader else {
            tracing::debug!("No module loader configured; nothing to discover");
            self.check_dependencies();
            return Ok(LoadReport::default());
        };

        let LoadReport { loaded, mut failures } = loader.load_all().await?;
        let mut registered = Vec::with_capacity(loaded.len());
        for module in loaded {
            match self.register(module.descriptor.clone()) {
                Ok(_) => registered.push(module),
                Err(e) => {
                    tracing::warn!(module = %module.source.name, error = %e, "Module not registered");
                    failures.push(LoadFailure {
                        name: module.source.name,
                        path: module.source.path,
                        error: LoaderError::Validation(e),
                    });
                }
            }
        }

        self.check_dependencies();
        Ok(LoadReport {
            loaded: registered,
            failures,
        })
    }

    /// Advisory check: logs cycles and unmet dependencies, never blocks.
    pub fn check_dependencies(&self) -> DependencyGraph {
        let graph = DependencyGraph::build(&self.registry.module_records(), &self.registry.names());
        graph.report();
        graph
    }

    async fn run_single(&self, name: &str, phase: Phase) -> Result<(), ModkitError> {
        let handle = self.registry.get_module(name)?;
        let ctx = self.ctx_builder.for_module(name);
        handle.run_phase(phase, &ctx).await?;
        tracing::info!(module = name, %phase, "Module {}", phase.reaches());
        Ok(())
    }

    pub async fn initialize_module(&self, name: &str) -> Result<(), ModkitError> {
        self.run_single(name, Phase::Initialize).await
    }

    pub async fn start_module(&self, name: &str) -> Result<(), ModkitError> {
        self.run_single(name, Phase::Start).await
    }

    pub async fn stop_module(&self, name: &str) -> Result<(), ModkitError> {
        self.run_single(name, Phase::Stop).await
    }

    /// Return a module to `registered` so it can be initialized again.
    /// Listeners it subscribed are dropped so a retried `initialize` starts
    /// from a clean bus.
    pub fn reset_module(&self, name: &str) -> Result<(), ModkitError> {
        let handle = self.registry.get_module(name)?;
        let dropped = self.events.remove_module_listeners(name);
        handle.reset();
        tracing::info!(module = name, listeners = dropped, "Module reset");
        Ok(())
    }

    async fn run_all(&self, phase: Phase, modules: Vec<Arc<ModuleHandle>>) -> PhaseSummary {
        tracing::info!("Phase: {phase}");
        let mut summary = PhaseSummary::new(phase);
        for handle in modules {
            let name = handle.name().to_string();
            if handle.status() != phase.requires() {
                tracing::debug!(module = %name, status = %handle.status(), %phase, "Skipping module");
                summary.skipped.push(name);
                continue;
            }
            let ctx = self.ctx_builder.for_module(&name);
            match handle.run_phase(phase, &ctx).await {
                Ok(()) => summary.succeeded.push(name),
                Err(e) => {
                    let cause = handle.snapshot().error.unwrap_or_else(|| e.to_string());
                    tracing::error!(module = %name, %phase, error = %cause, "Lifecycle hook failed");
                    summary.failed.push((name, cause));
                }
            }
        }
        summary
    }

    pub async fn initialize_all(&self) -> PhaseSummary {
        self.run_all(Phase::Initialize, self.registry.all_modules())
            .await
    }

    pub async fn start_all(&self) -> PhaseSummary {
        self.run_all(Phase::Start, self.registry.all_modules()).await
    }

    /// Stop started modules in reverse registration order.
    pub async fn stop_all(&self) -> PhaseSummary {
        let mut modules = self.registry.all_modules();
        modules.reverse();
        self.run_all(Phase::Stop, modules).await
    }

    /// Development hot-reload: stop if running, drop the module's listeners,
    /// rebuild it from disk and bring it back to its previous phase.
    pub async fn reload_module(&self, name: &str) -> Result<Arc<ModuleHandle>, ModkitError> {
        let loader = self
            .loader
            .as_ref()
            .ok_or_else(|| LoaderError::NotFound(name.to_string()))?;
        let previous = self.registry.get_module(name)?;
        let was_started = previous.status() == ModuleStatus::Started;
        if was_started {
            if let Err(e) = self.stop_module(name).await {
                tracing::warn!(module = name, error = %e, "Stop before reload failed");
            }
        }
        self.events.remove_module_listeners(name);

        let loaded = loader.reload(name).await?;
        if loaded.name() != name {
            return Err(ValidationError::Manifest {
                module: name.to_string(),
                reason: format!("manifest now names the module '{}'", loaded.name()),
            }
            .into());
        }
        let handle = self
            .registry
            .replace_module(ModuleHandle::from_descriptor(loaded.descriptor)?);

        self.initialize_module(name).await?;
        if was_started {
            self.start_module(name).await?;
        }
        Ok(handle)
    }

    pub async fn health(&self) -> HealthReport {
        self.registry.health_check().await
    }

    pub async fn module_health(&self, name: &str) -> Result<HealthEntry, ModkitError> {
        Ok(self.registry.module_health(name).await?)
    }

    pub fn diagnostics(&self) -> RuntimeDiagnostics {
        let graph = DependencyGraph::build(&self.registry.module_records(), &self.registry.names());
        RuntimeDiagnostics {
            modules: self.registry.module_records(),
            services: self.registry.services(),
            events: self.events.stats(),
            subscriptions: self
                .events
                .event_names()
                .into_iter()
                .map(|e| {
                    let n = self.events.listener_count(&e);
                    (e, n)
                })
                .collect(),
            dependencies: DependencyReport {
                cycle: graph.find_cycle(),
                missing: graph.missing().to_vec(),
            },
        }
    }

    pub(crate) async fn announce_started(&self) {
        self.events
            .emit(
                RUNTIME_STARTED,
                json!({ "modules": self.registry.module_names() }),
                EmitOptions::default().wait_for_all().from_module(RUNTIME_SOURCE),
            )
            .await;
    }

    /// Stop every module, then shut managed services down.
    pub async fn shutdown(&self) -> ShutdownSummary {
        self.events
            .emit(
                RUNTIME_STOPPING,
                json!({}),
                EmitOptions::default().wait_for_all().from_module(RUNTIME_SOURCE),
            )
            .await;
        let stop = self.stop_all().await;
        let failed_services = self.registry.shutdown().await;
        tracing::info!(
            stopped = stop.succeeded.len(),
            failed = stop.failed.len(),
            failed_services = failed_services.len(),
            "Runtime shut down"
        );
        ShutdownSummary {
            stop,
            failed_services,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::Module;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_start: bool,
    }

    #[async_trait]
    impl Module for Recording {
        async fn initialize(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
            self.log.lock().push(format!("init:{}", self.name));
            Ok(())
        }

        async fn start(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
            if self.fail_start {
                anyhow::bail!("port in use");
            }
            self.log.lock().push(format!("start:{}", self.name));
            Ok(())
        }

        async fn stop(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
            self.log.lock().push(format!("stop:{}", self.name));
            Ok(())
        }
    }

    fn runtime_with(names: &[(&'static str, bool)]) -> (ModuleRuntime, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let rt = ModuleRuntime::builder().build();
        for &(name, fail_start) in names {
            rt.register(ModuleDescriptor::new(name, "1.0.0").with_module(Arc::new(Recording {
                name,
                log: Arc::clone(&log),
                fail_start,
            })))
            .unwrap();
        }
        (rt, log)
    }

    #[tokio::test]
    async fn bulk_phases_isolate_failures_and_stop_in_reverse() {
        let (rt, log) = runtime_with(&[("tasks", false), ("team", true), ("analytics", false)]);

        assert!(rt.initialize_all().await.is_clean());
        let started = rt.start_all().await;
        assert_eq!(started.succeeded, vec!["tasks", "analytics"]);
        assert_eq!(started.failed[0].0, "team");
        assert!(started.failed[0].1.contains("port in use"));

        let summary = rt.shutdown().await;
        assert_eq!(summary.stop.succeeded, vec!["analytics", "tasks"]);
        assert_eq!(summary.stop.skipped, vec!["team"]);
        let log = log.lock();
        assert_eq!(log[log.len() - 2..], ["stop:analytics", "stop:tasks"]);
        assert_eq!(
            rt.registry().get_module("team").unwrap().status(),
            ModuleStatus::Error
        );
    }

    #[tokio::test]
    async fn single_target_operations_surface_errors() {
        let (rt, _) = runtime_with(&[("tasks", false)]);
        assert!(matches!(
            rt.start_module("tasks").await,
            Err(ModkitError::Lifecycle(_))
        ));
        assert!(matches!(
            rt.initialize_module("ghost").await,
            Err(ModkitError::Registry(_))
        ));
        rt.initialize_module("tasks").await.unwrap();
        rt.reset_module("tasks").unwrap();
        assert_eq!(
            rt.registry().get_module("tasks").unwrap().status(),
            ModuleStatus::Registered
        );
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let (rt, _) = runtime_with(&[("tasks", false)]);
        let err = rt
            .register(ModuleDescriptor::new("tasks", "2.0.0").with_module(Arc::new(Recording {
                name: "tasks",
                log: Arc::default(),
                fail_start: false,
            })))
            .unwrap_err();
        assert_eq!(err, ValidationError::Duplicate("tasks".into()));
    }

    #[tokio::test]
    async fn diagnostics_reflect_modules_and_bus() {
        let (rt, _) = runtime_with(&[("tasks", false)]);
        rt.initialize_all().await;
        rt.events()
            .emit("task:created", json!({}), EmitOptions::default().from_module("tasks"))
            .await;

        let diag = rt.diagnostics();
        assert_eq!(diag.modules[0].status, ModuleStatus::Initialized);
        assert_eq!(diag.events.per_module["tasks"], 1);
        assert!(diag.dependencies.cycle.is_none());
        let as_json = serde_json::to_value(&diag).unwrap();
        assert_eq!(as_json["modules"][0]["name"], "tasks");
    }
}
