//! Module records and their lifecycle state machine.
//!
//! ```text
//! registered --initialize--> initialized --start--> started --stop--> stopped
//!      ^                                                                 |
//!      +------------------------- reset (from any status) --------------+
//! any failed hook --> error
//! ```

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::ModuleCtx;
use crate::contracts::{Capability, Module, ModuleDescriptor};
use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    Registered,
    Initialized,
    Started,
    Stopped,
    Error,
}

impl ModuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleStatus::Registered => "registered",
            ModuleStatus::Initialized => "initialized",
            ModuleStatus::Started => "started",
            ModuleStatus::Stopped => "stopped",
            ModuleStatus::Error => "error",
        }
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle hook the runtime drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initialize,
    Start,
    Stop,
}

impl Phase {
    /// Status a record must be in for this phase to run.
    pub fn requires(self) -> ModuleStatus {
        match self {
            Phase::Initialize => ModuleStatus::Registered,
            Phase::Start => ModuleStatus::Initialized,
            Phase::Stop => ModuleStatus::Started,
        }
    }

    /// Status reached when the hook succeeds.
    pub fn reaches(self) -> ModuleStatus {
        match self {
            Phase::Initialize => ModuleStatus::Initialized,
            Phase::Start => ModuleStatus::Started,
            Phase::Stop => ModuleStatus::Stopped,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Initialize => "initialize",
            Phase::Start => "start",
            Phase::Stop => "stop",
        })
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cannot {phase} module '{module}' while it is {status}")]
    InvalidTransition {
        module: String,
        phase: Phase,
        status: ModuleStatus,
    },
    #[error("{phase} failed for module '{module}'")]
    HookFailed {
        module: String,
        phase: Phase,
        #[source]
        source: anyhow::Error,
    },
}

/// Lifecycle metadata of one module. Cloned out of its [`ModuleHandle`] as a
/// read-only snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleRecord {
    pub name: String,
    pub version: String,
    pub description: String,
    pub dependencies: Vec<String>,
    pub provides: Vec<Capability>,
    pub status: ModuleStatus,
    pub error: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub initialized_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl ModuleRecord {
    fn stamp(&mut self, phase: Phase, at: DateTime<Utc>) {
        match phase {
            Phase::Initialize => self.initialized_at = Some(at),
            Phase::Start => self.started_at = Some(at),
            Phase::Stop => self.stopped_at = Some(at),
        }
    }
}

/// A registered module: its implementation plus the record the runtime mutates.
pub struct ModuleHandle {
    name: String,
    module: Arc<dyn Module>,
    record: RwLock<ModuleRecord>,
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("record", &*self.record.read())
            .finish()
    }
}

impl ModuleHandle {
    /// Build a record from a raw descriptor, rejecting it before registration
    /// when `name`, `version` or `initialize` is missing.
    pub fn from_descriptor(descriptor: ModuleDescriptor) -> Result<Self, ValidationError> {
        descriptor.validate()?;
        let ModuleDescriptor {
            name,
            version,
            description,
            dependencies,
            provides,
            module,
        } = descriptor;
        let module = module.ok_or_else(|| ValidationError::MissingFields {
            module: name.clone(),
            missing: vec!["initialize"],
        })?;

        Ok(Self {
            name: name.clone(),
            module,
            record: RwLock::new(ModuleRecord {
                name,
                version,
                description,
                dependencies,
                provides,
                status: ModuleStatus::Registered,
                error: None,
                registered_at: Utc::now(),
                initialized_at: None,
                started_at: None,
                stopped_at: None,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    pub fn status(&self) -> ModuleStatus {
        self.record.read().status
    }

    pub fn snapshot(&self) -> ModuleRecord {
        self.record.read().clone()
    }

    /// Return to `registered`: runs the module's own `reset`, then clears the
    /// error and every lifecycle timestamp except the registration time.
    pub fn reset(&self) {
        self.module.reset();
        let mut record = self.record.write();
        record.status = ModuleStatus::Registered;
        record.error = None;
        record.initialized_at = None;
        record.started_at = None;
        record.stopped_at = None;
        tracing::debug!(module = %self.name, "Module record reset");
    }

    /// Run one lifecycle hook and apply the resulting transition.
    ///
    /// A hook that errors or panics moves the record to `error`; the error is
    /// returned so single-target callers can observe it.
    pub async fn run_phase(&self, phase: Phase, ctx: &ModuleCtx) -> Result<(), LifecycleError> {
        let status = self.status();
        if status != phase.requires() {
            return Err(LifecycleError::InvalidTransition {
                module: self.name.clone(),
                phase,
                status,
            });
        }

        let hook = async {
            match phase {
                Phase::Initialize => self.module.initialize(ctx).await,
                Phase::Start => self.module.start(ctx).await,
                Phase::Stop => self.module.stop(ctx).await,
            }
        };
        let outcome = match AssertUnwindSafe(hook).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(anyhow::anyhow!(
                "{phase} hook panicked: {}",
                crate::panic_message(panic.as_ref())
            )),
        };

        match outcome {
            Ok(()) => {
                let mut record = self.record.write();
                record.status = phase.reaches();
                record.stamp(phase, Utc::now());
                Ok(())
            }
            Err(source) => {
                {
                    let mut record = self.record.write();
                    record.status = ModuleStatus::Error;
                    record.error = Some(format!("{source:#}"));
                }
                self.module.handle_error(phase, &source);
                Err(LifecycleError::HookFailed {
                    module: self.name.clone(),
                    phase,
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_ctx;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Fails `initialize` while `fail` is set.
    #[derive(Default)]
    struct Flaky {
        fail: AtomicBool,
        errors_seen: AtomicUsize,
        resets: AtomicUsize,
    }

    #[async_trait]
    impl Module for Flaky {
        async fn initialize(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("database service missing");
            }
            Ok(())
        }

        fn reset(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }

        fn handle_error(&self, _phase: Phase, _err: &anyhow::Error) {
            self.errors_seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicky;

    #[async_trait]
    impl Module for Panicky {
        async fn initialize(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
            panic!("boom");
        }
    }

    fn handle(module: Arc<dyn Module>) -> ModuleHandle {
        ModuleHandle::from_descriptor(ModuleDescriptor::new("tasks", "1.0.0").with_module(module))
            .unwrap()
    }

    #[test]
    fn factory_rejects_incomplete_descriptor() {
        let err = ModuleHandle::from_descriptor(ModuleDescriptor::new("tasks", "")).unwrap_err();
        assert_eq!(err.missing_fields(), ["version", "initialize"]);
    }

    #[tokio::test]
    async fn happy_path_walks_the_graph_and_stamps_times() {
        let h = handle(Arc::new(Flaky::default()));
        let ctx = test_ctx("tasks");

        assert_eq!(h.status(), ModuleStatus::Registered);
        h.run_phase(Phase::Initialize, &ctx).await.unwrap();
        h.run_phase(Phase::Start, &ctx).await.unwrap();
        h.run_phase(Phase::Stop, &ctx).await.unwrap();

        let rec = h.snapshot();
        assert_eq!(rec.status, ModuleStatus::Stopped);
        assert!(rec.initialized_at.is_some());
        assert!(rec.started_at.is_some());
        assert!(rec.stopped_at.is_some());
        assert!(rec.error.is_none());
    }

    #[tokio::test]
    async fn out_of_order_transition_is_rejected_without_state_change() {
        let h = handle(Arc::new(Flaky::default()));
        let err = h.run_phase(Phase::Start, &test_ctx("tasks")).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition {
                phase: Phase::Start,
                status: ModuleStatus::Registered,
                ..
            }
        ));
        assert_eq!(h.status(), ModuleStatus::Registered);
    }

    #[tokio::test]
    async fn failed_hook_moves_to_error_and_reset_allows_retry() {
        let flaky = Arc::new(Flaky::default());
        flaky.fail.store(true, Ordering::SeqCst);
        let errored = handle(flaky.clone());
        let ctx = test_ctx("tasks");

        let err = errored.run_phase(Phase::Initialize, &ctx).await.unwrap_err();
        assert!(matches!(err, LifecycleError::HookFailed { phase: Phase::Initialize, .. }));
        let rec = errored.snapshot();
        assert_eq!(rec.status, ModuleStatus::Error);
        assert!(rec.error.as_deref().unwrap().contains("database service missing"));
        assert_eq!(flaky.errors_seen.load(Ordering::SeqCst), 1);

        // error is not terminal, but only reset leaves it
        assert!(errored.run_phase(Phase::Initialize, &ctx).await.is_err());
        errored.reset();
        assert_eq!(flaky.resets.load(Ordering::SeqCst), 1);
        flaky.fail.store(false, Ordering::SeqCst);
        errored.run_phase(Phase::Initialize, &ctx).await.unwrap();

        let clean = handle(Arc::new(Flaky::default()));
        clean.run_phase(Phase::Initialize, &ctx).await.unwrap();

        let (a, b) = (errored.snapshot(), clean.snapshot());
        assert_eq!(a.status, b.status);
        assert_eq!(a.error, b.error);
        assert_eq!(a.started_at, b.started_at);
        assert_eq!(a.stopped_at, b.stopped_at);
        assert!(a.initialized_at.is_some() && b.initialized_at.is_some());
    }

    #[tokio::test]
    async fn panicking_hook_is_contained() {
        let h = handle(Arc::new(Panicky));
        let err = h.run_phase(Phase::Initialize, &test_ctx("tasks")).await.unwrap_err();
        assert!(matches!(err, LifecycleError::HookFailed { .. }));
        let rec = h.snapshot();
        assert_eq!(rec.status, ModuleStatus::Error);
        assert!(rec.error.unwrap().contains("boom"));
    }
}
