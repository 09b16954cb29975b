use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use modkit::events::{response_event, EmitOptions};
use modkit::{ListenerOptions, Module, ModuleCtx, ModuleFactory, Phase, RegisterOptions};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::TaskEventsConfig;
use crate::domain::model::{ActivityKind, TaskEvent};
use crate::domain::service::TaskStatsService;

/// Registry name of the [`TaskStatsService`].
pub const STATS_SERVICE: &str = "task_stats";

pub const TASK_CREATED: &str = "task:created";
pub const TASK_COMPLETED: &str = "task:completed";
pub const TASK_STATS: &str = "task:stats";
pub const NOTIFICATION_REQUESTED: &str = "notification:requested";

const ROUTE_PREFIX: &str = "task_events";

pub struct TaskEventsModule {
    service: ArcSwapOption<TaskStatsService>,
}

impl Default for TaskEventsModule {
    fn default() -> Self {
        Self {
            service: ArcSwapOption::from(None),
        }
    }
}

impl TaskEventsModule {
    pub fn service(&self) -> Option<Arc<TaskStatsService>> {
        self.service.load_full()
    }

    fn subscribe(&self, ctx: &ModuleCtx, cfg: &TaskEventsConfig, svc: &Arc<TaskStatsService>) {
        let events = ctx.events();
        let owner = || ListenerOptions::new().module(ctx.module_name());

        // counted before default-priority listeners see the task
        let created = Arc::clone(svc);
        events.on(
            TASK_CREATED,
            move |payload| {
                let created = Arc::clone(&created);
                async move {
                    let task = TaskEvent::from_payload(TASK_CREATED, payload)?;
                    created.record(ActivityKind::Created, &task);
                    Ok(())
                }
            },
            owner().priority(10),
        );

        let completed = Arc::clone(svc);
        let notify = cfg.notify_on_complete;
        let bus = events.clone();
        let source = ctx.module_name().to_string();
        events.on(
            TASK_COMPLETED,
            move |payload| {
                let completed = Arc::clone(&completed);
                let bus = bus.clone();
                let source = source.clone();
                async move {
                    let task = TaskEvent::from_payload(TASK_COMPLETED, payload)?;
                    completed.record(ActivityKind::Completed, &task);
                    if notify {
                        bus.publish_with(
                            NOTIFICATION_REQUESTED,
                            json!({
                                "kind": "task_completed",
                                "task_id": task.id,
                                "title": task.title,
                                "recipient": task.assignee,
                            }),
                            EmitOptions::default().from_module(source),
                        );
                    }
                    Ok(())
                }
            },
            owner(),
        );

        let stats = Arc::clone(svc);
        let bus = events.clone();
        let source = ctx.module_name().to_string();
        events.on(
            TASK_STATS,
            move |_payload: Value| {
                let stats = Arc::clone(&stats);
                let bus = bus.clone();
                let source = source.clone();
                async move {
                    let reply = serde_json::to_value(stats.stats())?;
                    bus.emit(
                        &response_event(TASK_STATS),
                        reply,
                        EmitOptions::default().from_module(source),
                    )
                    .await;
                    Ok(())
                }
            },
            owner(),
        );
    }
}

#[async_trait]
impl Module for TaskEventsModule {
    async fn initialize(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let cfg: TaskEventsConfig = ctx.config()?;
        info!(
            notify_on_complete = cfg.notify_on_complete,
            max_recent = cfg.max_recent,
            "Initializing task_events module"
        );

        let svc = Arc::new(TaskStatsService::new(cfg.max_recent));
        ctx.registry()
            .register_managed(STATS_SERVICE, Arc::clone(&svc), RegisterOptions::default());
        self.subscribe(ctx, &cfg, &svc);

        // handlers resolve the service per request; mount once across reloads
        if !ctx.router().is_mounted(ROUTE_PREFIX) {
            ctx.router().nest(
                ROUTE_PREFIX,
                crate::api::rest::router(Arc::clone(ctx.registry())),
            )?;
        }

        self.service.store(Some(svc));
        Ok(())
    }

    async fn stop(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        if let Some(svc) = self.service.load_full() {
            let stats = svc.stats();
            info!(open = stats.open, "task_events stopped");
        }
        Ok(())
    }

    async fn health(&self) -> anyhow::Result<Option<Value>> {
        let Some(svc) = self.service.load_full() else {
            return Ok(None);
        };
        let stats = svc.stats();
        Ok(Some(json!({
            "tracked": stats.created,
            "open": stats.open,
            "recent": svc.recent(None).len(),
        })))
    }

    fn reset(&self) {
        self.service.store(None);
    }

    fn handle_error(&self, phase: Phase, err: &anyhow::Error) {
        warn!(phase = %phase, error = %err, "task_events hook failed");
    }
}

fn build() -> Arc<dyn Module> {
    Arc::new(TaskEventsModule::default())
}

inventory::submit! { ModuleFactory::new("task_events", build) }
