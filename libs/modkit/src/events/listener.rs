use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;

pub type ListenerId = String;

pub(crate) type ListenerFuture = BoxFuture<'static, anyhow::Result<()>>;
pub(crate) type ListenerFn = Arc<dyn Fn(Value) -> ListenerFuture + Send + Sync>;

/// Registration options for [`EventBus::on`](super::EventBus::on).
#[derive(Debug, Clone, Default)]
pub struct ListenerOptions {
    /// Owning module, for diagnostics and targeted delivery.
    pub module_name: Option<String>,
    /// Higher fires first; ties keep registration order.
    pub priority: i32,
    /// Explicit id; a random one is generated when absent.
    pub id: Option<ListenerId>,
}

impl ListenerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(mut self, name: impl Into<String>) -> Self {
        self.module_name = Some(name.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn id(mut self, id: impl Into<ListenerId>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Clone)]
pub(crate) struct Listener {
    pub(crate) id: ListenerId,
    pub(crate) module_name: Option<String>,
    pub(crate) priority: i32,
    /// Global registration counter, the tie-breaker for equal priorities.
    pub(crate) seq: u64,
    pub(crate) callback: ListenerFn,
}

impl Listener {
    pub(crate) fn info(&self) -> ListenerInfo {
        ListenerInfo {
            id: self.id.clone(),
            module: self.module_name.clone(),
            priority: self.priority,
        }
    }
}

/// Introspection view of a registered listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerInfo {
    pub id: ListenerId,
    pub module: Option<String>,
    pub priority: i32,
}

/// How one listener invocation settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerOutcome {
    pub listener_id: ListenerId,
    pub module: Option<String>,
    pub error: Option<String>,
}

impl ListenerOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Payload transformer run, in registration order, before listeners see an event.
#[async_trait]
pub trait EventMiddleware: Send + Sync + 'static {
    async fn process(&self, event: &str, payload: Value) -> anyhow::Result<Value>;
}

/// Adapter turning a synchronous closure into an [`EventMiddleware`].
pub struct FnMiddleware<F>(pub F);

#[async_trait]
impl<F> EventMiddleware for FnMiddleware<F>
where
    F: Fn(&str, Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    async fn process(&self, event: &str, payload: Value) -> anyhow::Result<Value> {
        (self.0)(event, payload)
    }
}
