//! Name → instance service container plus the module record namespace.

use std::any::{type_name, Any};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::contracts::{ManagedService, ModuleDescriptor};
use crate::error::ValidationError;
use crate::health::{guarded, HealthEntry, HealthReport};
use crate::lifecycle::{ModuleHandle, ModuleRecord, ModuleStatus};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{kind} '{name}' not found; registered: [{}]", available.join(", "))]
    NotFound {
        kind: &'static str,
        name: String,
        available: Vec<String>,
    },
    #[error("service '{name}' is not of type {expected}")]
    TypeMismatch { name: String, expected: &'static str },
}

#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    /// Names of services this one relies on. Descriptive only.
    pub dependencies: Vec<String>,
}

impl RegisterOptions {
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }
}

/// Read-only view of a service entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub type_name: &'static str,
    pub dependencies: Vec<String>,
    pub managed: bool,
    pub registered_at: DateTime<Utc>,
}

struct ServiceEntry {
    instance: Arc<dyn Any + Send + Sync>,
    managed: Option<Arc<dyn ManagedService>>,
    type_name: &'static str,
    dependencies: Vec<String>,
    registered_at: DateTime<Utc>,
    seq: u64,
}

struct ModuleSlot {
    seq: u64,
    handle: Arc<ModuleHandle>,
}

/// In-process service container.
///
/// Service names are unique at any instant; re-registering overwrites the
/// previous entry. Module records live in a separate namespace so they never
/// collide with service names.
#[derive(Default)]
pub struct ServiceRegistry {
    services: DashMap<String, ServiceEntry>,
    modules: DashMap<String, ModuleSlot>,
    seq: AtomicU64,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .field("modules", &self.module_names())
            .finish()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register<T>(&self, name: &str, instance: Arc<T>, opts: RegisterOptions)
    where
        T: Any + Send + Sync,
    {
        self.insert(name, instance, None, type_name::<T>(), opts);
    }

    /// Register a service that exposes its own health probe and shutdown hook.
    pub fn register_managed<T>(&self, name: &str, instance: Arc<T>, opts: RegisterOptions)
    where
        T: ManagedService,
    {
        let managed: Arc<dyn ManagedService> = instance.clone();
        self.insert(name, instance, Some(managed), type_name::<T>(), opts);
    }

    fn insert(
        &self,
        name: &str,
        instance: Arc<dyn Any + Send + Sync>,
        managed: Option<Arc<dyn ManagedService>>,
        type_name: &'static str,
        opts: RegisterOptions,
    ) {
        let entry = ServiceEntry {
            instance,
            managed,
            type_name,
            dependencies: opts.dependencies,
            registered_at: Utc::now(),
            seq: self.next_seq(),
        };
        if self.services.insert(name.to_string(), entry).is_some() {
            tracing::warn!(service = name, "Service already registered; overwriting");
        } else {
            tracing::debug!(service = name, type_name, "Service registered");
        }
    }

    pub fn get<T>(&self, name: &str) -> Result<Arc<T>, RegistryError>
    where
        T: Any + Send + Sync,
    {
        let instance = self
            .services
            .get(name)
            .map(|e| Arc::clone(&e.instance))
            .ok_or_else(|| RegistryError::NotFound {
                kind: "service",
                name: name.to_string(),
                available: self.names(),
            })?;
        instance
            .downcast::<T>()
            .map_err(|_| RegistryError::TypeMismatch {
                name: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    pub fn has(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Service names in registration order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<(u64, String)> = self
            .services
            .iter()
            .map(|e| (e.seq, e.key().clone()))
            .collect();
        names.sort_unstable();
        names.into_iter().map(|(_, n)| n).collect()
    }

    pub fn service_info(&self, name: &str) -> Option<ServiceInfo> {
        self.services.get(name).map(|e| ServiceInfo {
            name: name.to_string(),
            type_name: e.type_name,
            dependencies: e.dependencies.clone(),
            managed: e.managed.is_some(),
            registered_at: e.registered_at,
        })
    }

    pub fn services(&self) -> Vec<ServiceInfo> {
        self.names()
            .iter()
            .filter_map(|n| self.service_info(n))
            .collect()
    }

    /// Validate `descriptor` and add its record under the module namespace.
    pub fn register_module(
        &self,
        descriptor: ModuleDescriptor,
    ) -> Result<Arc<ModuleHandle>, ValidationError> {
        let handle = Arc::new(ModuleHandle::from_descriptor(descriptor)?);
        match self.modules.entry(handle.name().to_string()) {
            Entry::Occupied(o) => Err(ValidationError::Duplicate(o.key().clone())),
            Entry::Vacant(v) => {
                v.insert(ModuleSlot {
                    seq: self.next_seq(),
                    handle: Arc::clone(&handle),
                });
                tracing::debug!(module = handle.name(), "Module registered");
                Ok(handle)
            }
        }
    }

    /// Swap the record of an already known module, keeping its position.
    pub fn replace_module(&self, handle: ModuleHandle) -> Arc<ModuleHandle> {
        let handle = Arc::new(handle);
        let name = handle.name().to_string();
        let seq = self
            .modules
            .get(&name)
            .map(|slot| slot.seq)
            .unwrap_or_else(|| self.next_seq());
        self.modules.insert(
            name,
            ModuleSlot {
                seq,
                handle: Arc::clone(&handle),
            },
        );
        handle
    }

    pub fn get_module(&self, name: &str) -> Result<Arc<ModuleHandle>, RegistryError> {
        self.modules
            .get(name)
            .map(|slot| Arc::clone(&slot.handle))
            .ok_or_else(|| RegistryError::NotFound {
                kind: "module",
                name: name.to_string(),
                available: self.module_names(),
            })
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Module handles in registration order.
    pub fn all_modules(&self) -> Vec<Arc<ModuleHandle>> {
        let mut slots: Vec<(u64, Arc<ModuleHandle>)> = self
            .modules
            .iter()
            .map(|s| (s.seq, Arc::clone(&s.handle)))
            .collect();
        slots.sort_by_key(|(seq, _)| *seq);
        slots.into_iter().map(|(_, h)| h).collect()
    }

    pub fn module_names(&self) -> Vec<String> {
        self.all_modules()
            .iter()
            .map(|h| h.name().to_string())
            .collect()
    }

    pub fn module_records(&self) -> Vec<ModuleRecord> {
        self.all_modules().iter().map(|h| h.snapshot()).collect()
    }

    /// Probe one module: its own `health()` answer when it gives one, the
    /// record status otherwise.
    pub async fn module_health(&self, name: &str) -> Result<HealthEntry, RegistryError> {
        let handle = self.get_module(name)?;
        Ok(probe_module(&handle).await)
    }

    /// Probe every service and every module concurrently. A failing or
    /// panicking probe becomes an error entry and never aborts the check.
    pub async fn health_check(&self) -> HealthReport {
        // Snapshot first so no map guard is held across a probe.
        let services: Vec<(String, Option<Arc<dyn ManagedService>>, DateTime<Utc>)> = self
            .services
            .iter()
            .map(|e| (e.key().clone(), e.managed.clone(), e.registered_at))
            .collect();
        let modules = self.all_modules();

        let service_probes = services.into_iter().map(|(name, managed, registered_at)| async move {
            let entry = match managed {
                None => HealthEntry::healthy(
                    json!({ "status": "registered", "registered_at": registered_at }),
                    registered_at,
                ),
                Some(svc) => match guarded(svc.health_check()).await {
                    Ok(detail) => HealthEntry::healthy(detail, registered_at),
                    Err(e) => {
                        tracing::warn!(service = %name, error = %e, "Health check failed");
                        HealthEntry::failed(format!("{e:#}"), registered_at)
                    }
                },
            };
            (name, entry)
        });
        let module_probes = modules.iter().map(|h| async move {
            (h.name().to_string(), probe_module(h).await)
        });

        let (services, modules) = futures::join!(join_all(service_probes), join_all(module_probes));
        let report = HealthReport::new(
            services.into_iter().collect::<BTreeMap<_, _>>(),
            modules.into_iter().collect::<BTreeMap<_, _>>(),
        );
        tracing::debug!(status = ?report.status, failed = ?report.failed(), "Health check complete");
        report
    }

    /// Invoke every managed service's shutdown hook, newest first.
    /// Best effort: returns the names whose shutdown failed.
    pub async fn shutdown(&self) -> Vec<String> {
        let mut managed: Vec<(u64, String, Arc<dyn ManagedService>)> = self
            .services
            .iter()
            .filter_map(|e| e.managed.clone().map(|m| (e.seq, e.key().clone(), m)))
            .collect();
        managed.sort_by(|a, b| b.0.cmp(&a.0));

        let mut failed = Vec::new();
        for (_, name, svc) in managed {
            match guarded(svc.shutdown()).await {
                Ok(()) => tracing::debug!(service = %name, "Service shut down"),
                Err(e) => {
                    tracing::error!(service = %name, error = %e, "Service shutdown failed");
                    failed.push(name);
                }
            }
        }
        failed
    }
}

/// A record in `error` is reported failed whatever the module's own probe says.
async fn probe_module(handle: &ModuleHandle) -> HealthEntry {
    let record = handle.snapshot();
    if record.status == ModuleStatus::Error {
        let mut entry = HealthEntry::failed(
            record
                .error
                .clone()
                .unwrap_or_else(|| "module is in error state".to_string()),
            record.registered_at,
        );
        entry.module_status = Some(record.status);
        return entry;
    }
    let mut entry = match guarded(handle.module().health()).await {
        Ok(Some(detail)) => HealthEntry::healthy(detail, record.registered_at),
        Ok(None) => HealthEntry::healthy(json!({ "status": record.status }), record.registered_at),
        Err(e) => {
            tracing::warn!(module = %record.name, error = %e, "Module health probe failed");
            HealthEntry::failed(format!("{e:#}"), record.registered_at)
        }
    };
    entry.module_status = Some(record.status);
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ModuleCtx;
    use crate::contracts::Module;
    use crate::health::HealthStatus;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Db {
        fail: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
        tag: &'static str,
    }

    #[async_trait]
    impl ManagedService for Db {
        async fn health_check(&self) -> anyhow::Result<serde_json::Value> {
            if self.fail {
                anyhow::bail!("connection refused");
            }
            Ok(json!({ "pool": 4 }))
        }

        async fn shutdown(&self) -> anyhow::Result<()> {
            self.log.lock().push(self.tag);
            if self.fail {
                anyhow::bail!("close failed");
            }
            Ok(())
        }
    }

    struct Noop;

    #[async_trait]
    impl Module for Noop {
        async fn initialize(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn db(fail: bool, tag: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<Db> {
        Arc::new(Db {
            fail,
            log: Arc::clone(log),
            tag,
        })
    }

    #[test]
    fn get_returns_the_same_instance() {
        let reg = ServiceRegistry::new();
        let value = Arc::new(String::from("postgres://"));
        reg.register("dsn", value.clone(), RegisterOptions::default());
        assert!(Arc::ptr_eq(&reg.get::<String>("dsn").unwrap(), &value));
    }

    #[test]
    fn missing_name_lists_what_is_registered() {
        let reg = ServiceRegistry::new();
        reg.register("database", Arc::new(1u8), RegisterOptions::default());
        reg.register("mailer", Arc::new(2u8), RegisterOptions::default());

        let err = reg.get::<u8>("cache").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'cache'"));
        assert!(msg.contains("database, mailer"));
    }

    #[test]
    fn wrong_type_is_reported() {
        let reg = ServiceRegistry::new();
        reg.register("n", Arc::new(5u32), RegisterOptions::default());
        assert!(matches!(
            reg.get::<String>("n"),
            Err(RegistryError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn re_registering_overwrites() {
        let reg = ServiceRegistry::new();
        reg.register("n", Arc::new(1u32), RegisterOptions::default());
        reg.register(
            "n",
            Arc::new(2u32),
            RegisterOptions::default().depends_on("database"),
        );
        assert_eq!(*reg.get::<u32>("n").unwrap(), 2);
        assert_eq!(reg.names(), vec!["n".to_string()]);
        assert_eq!(reg.service_info("n").unwrap().dependencies, vec!["database"]);
    }

    #[test]
    fn module_namespace_is_separate_and_rejects_duplicates() {
        let reg = ServiceRegistry::new();
        reg.register("tasks", Arc::new(0u8), RegisterOptions::default());
        let desc = || ModuleDescriptor::new("tasks", "1.2.0").with_module(Arc::new(Noop));

        let handle = reg.register_module(desc()).unwrap();
        assert_eq!(handle.snapshot().version, "1.2.0");
        assert!(matches!(
            reg.register_module(desc()),
            Err(ValidationError::Duplicate(_))
        ));
        assert!(reg.has("tasks") && reg.has_module("tasks"));
        assert!(matches!(
            reg.get_module("team"),
            Err(RegistryError::NotFound { kind: "module", .. })
        ));
    }

    #[tokio::test]
    async fn shutdown_is_best_effort_and_reverse_ordered() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let reg = ServiceRegistry::new();
        reg.register_managed("first", db(false, "first", &log), RegisterOptions::default());
        reg.register_managed("broken", db(true, "broken", &log), RegisterOptions::default());
        reg.register("plain", Arc::new(()), RegisterOptions::default());
        reg.register_managed("last", db(false, "last", &log), RegisterOptions::default());

        let failed = reg.shutdown().await;
        assert_eq!(failed, vec!["broken".to_string()]);
        assert_eq!(*log.lock(), vec!["last", "broken", "first"]);
    }

    #[tokio::test]
    async fn every_failed_probe_makes_the_registry_unhealthy() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let reg = ServiceRegistry::new();
        reg.register_managed("a", db(true, "a", &log), RegisterOptions::default());
        reg.register_managed("b", db(true, "b", &log), RegisterOptions::default());

        let report = reg.health_check().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.failed(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn empty_registry_is_healthy() {
        let report = ServiceRegistry::new().health_check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.services.is_empty() && report.modules.is_empty());
    }

    #[tokio::test]
    async fn module_health_falls_back_to_record_status() {
        let reg = ServiceRegistry::new();
        reg.register_module(ModuleDescriptor::new("tasks", "1.0.0").with_module(Arc::new(Noop)))
            .unwrap();
        let entry = reg.module_health("tasks").await.unwrap();
        assert!(entry.is_healthy());
        assert_eq!(entry.module_status, Some(ModuleStatus::Registered));
        assert_eq!(entry.detail, Some(json!({ "status": "registered" })));
    }
}
