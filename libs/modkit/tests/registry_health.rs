use std::sync::Arc;

use async_trait::async_trait;
use modkit::health::{HealthStatus, ProbeStatus};
use modkit::{
    ManagedService, Module, ModuleCtx, ModuleDescriptor, ModuleRuntime, ModuleStatus,
    RegisterOptions, ServiceRegistry,
};
use serde_json::{json, Value};

struct Probe(Result<Value, &'static str>);

#[async_trait]
impl ManagedService for Probe {
    async fn health_check(&self) -> anyhow::Result<Value> {
        match &self.0 {
            Ok(v) => Ok(v.clone()),
            Err(msg) => Err(anyhow::anyhow!(*msg)),
        }
    }
}

struct Exploding;

#[async_trait]
impl ManagedService for Exploding {
    async fn health_check(&self) -> anyhow::Result<Value> {
        panic!("probe blew up")
    }
}

struct Reporting;

#[async_trait]
impl Module for Reporting {
    async fn initialize(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    async fn health(&self) -> anyhow::Result<Option<Value>> {
        Ok(Some(json!({ "queue": 0 })))
    }
}

/// Reports detail from its own probe but cannot start.
struct StartFails;

#[async_trait]
impl Module for StartFails {
    async fn initialize(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    async fn start(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        anyhow::bail!("port already in use")
    }

    async fn health(&self) -> anyhow::Result<Option<Value>> {
        Ok(Some(json!({ "queue": 0 })))
    }
}

#[tokio::test]
async fn module_in_error_state_is_failed_despite_own_probe() {
    let rt = ModuleRuntime::builder().build();
    rt.register(ModuleDescriptor::new("webhooks", "1.0.0").with_module(Arc::new(StartFails)))
        .unwrap();
    rt.register(ModuleDescriptor::new("analytics", "0.3.0").with_module(Arc::new(Reporting)))
        .unwrap();
    rt.initialize_all().await;
    let summary = rt.start_all().await;
    assert_eq!(summary.failed.len(), 1);

    let report = rt.health().await;

    assert_eq!(report.status, HealthStatus::Degraded);
    let failed = &report.modules["webhooks"];
    assert_eq!(failed.status, ProbeStatus::Error);
    assert_eq!(failed.module_status, Some(ModuleStatus::Error));
    assert!(failed.error.as_deref().unwrap().contains("port already in use"));
    assert!(report.modules["analytics"].is_healthy());
}

#[tokio::test]
async fn one_failing_service_degrades_the_aggregate() {
    let reg = ServiceRegistry::new();
    reg.register_managed("database", Arc::new(Probe(Ok(json!({ "pool": 8 })))), RegisterOptions::default());
    reg.register_managed("whatsapp", Arc::new(Probe(Err("provider unreachable"))), RegisterOptions::default());
    reg.register_managed("mailer", Arc::new(Probe(Ok(json!("ok")))), RegisterOptions::default());

    let report = reg.health_check().await;

    assert_eq!(report.status, HealthStatus::Degraded);
    let failed = &report.services["whatsapp"];
    assert_eq!(failed.status, ProbeStatus::Error);
    assert!(failed.error.as_deref().unwrap().contains("provider unreachable"));
    assert_eq!(report.services["database"].detail, Some(json!({ "pool": 8 })));
    assert!(report.services["mailer"].is_healthy());
}

#[tokio::test]
async fn panicking_probe_and_errored_module_are_error_entries() {
    let reg = ServiceRegistry::new();
    reg.register_managed("cache", Arc::new(Exploding), RegisterOptions::default());
    reg.register("config", Arc::new(json!({})), RegisterOptions::default());
    reg.register_module(ModuleDescriptor::new("analytics", "0.3.0").with_module(Arc::new(Reporting)))
        .unwrap();

    let report = reg.health_check().await;

    assert_eq!(report.status, HealthStatus::Degraded);
    assert!(report.services["cache"].error.as_deref().unwrap().contains("probe blew up"));
    assert!(report.services["config"].is_healthy());
    let module = &report.modules["analytics"];
    assert_eq!(module.detail, Some(json!({ "queue": 0 })));
    assert_eq!(module.module_status, Some(ModuleStatus::Registered));
}

#[test]
fn register_then_get_is_reference_equal() {
    #[derive(Debug)]
    struct Db {
        _url: String,
    }

    let reg = ServiceRegistry::new();
    let db = Arc::new(Db {
        _url: "postgres://localhost/taskhub".into(),
    });
    reg.register("database", Arc::clone(&db), RegisterOptions::default());

    let got = reg.get::<Db>("database").unwrap();
    assert!(Arc::ptr_eq(&got, &db));
    assert!(reg.has("database"));
    assert_eq!(reg.names(), ["database"]);
}
