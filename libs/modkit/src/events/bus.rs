use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

use super::listener::{
    EventMiddleware, FnMiddleware, Listener, ListenerFn, ListenerFuture, ListenerId, ListenerInfo,
    ListenerOptions, ListenerOutcome,
};
use super::stats::{EventCounters, EventStats};

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
pub const RESPONSE_SUFFIX: &str = ":response";

/// Name of the event a responder emits to answer `event`.
pub fn response_event(event: &str) -> String {
    format!("{event}{RESPONSE_SUFFIX}")
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("no '{event}{RESPONSE_SUFFIX}' within {timeout:?}")]
    Timeout { event: String, timeout: Duration },
    #[error("response channel for '{event}' closed before a reply arrived")]
    ResponseDropped { event: String },
}

#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    /// Suspend the emitter until every listener has settled.
    pub wait_for_all: bool,
    /// Deliver only to listeners owned by this module.
    pub target_module: Option<String>,
    /// Module the emission is attributed to in the counters.
    pub source_module: Option<String>,
}

impl EmitOptions {
    pub fn wait_for_all(mut self) -> Self {
        self.wait_for_all = true;
        self
    }

    pub fn to_module(mut self, module: impl Into<String>) -> Self {
        self.target_module = Some(module.into());
        self
    }

    pub fn from_module(mut self, module: impl Into<String>) -> Self {
        self.source_module = Some(module.into());
        self
    }
}

/// What the emitter gets back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitReport {
    /// Fire-and-forget: listeners were handed to a background task.
    Dispatched { listeners: usize },
    /// Wait-for-all: one settled outcome per listener, in invocation order.
    Settled(Vec<ListenerOutcome>),
}

impl EmitReport {
    pub fn listeners(&self) -> usize {
        match self {
            EmitReport::Dispatched { listeners } => *listeners,
            EmitReport::Settled(outcomes) => outcomes.len(),
        }
    }

    pub fn outcomes(&self) -> &[ListenerOutcome] {
        match self {
            EmitReport::Dispatched { .. } => &[],
            EmitReport::Settled(outcomes) => outcomes,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &ListenerOutcome> {
        self.outcomes().iter().filter(|o| !o.is_ok())
    }
}

struct Inner {
    listeners: DashMap<String, Vec<Listener>>,
    middleware: RwLock<Vec<Arc<dyn EventMiddleware>>>,
    seq: AtomicU64,
    counters: EventCounters,
    response_timeout: Duration,
}

/// In-process publish/subscribe hub. Cloning yields another handle to the
/// same bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_response_timeout(DEFAULT_RESPONSE_TIMEOUT)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("events", &self.inner.listeners.len())
            .field("response_timeout", &self.inner.response_timeout)
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus whose `emit_and_wait` falls back to `timeout` when the caller gives none.
    pub fn with_response_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                listeners: DashMap::new(),
                middleware: RwLock::new(Vec::new()),
                seq: AtomicU64::new(0),
                counters: EventCounters::default(),
                response_timeout: timeout,
            }),
        }
    }

    /// Subscribe `callback` to `event`.
    ///
    /// The listener list is re-sorted by (priority desc, registration order
    /// asc) on every call. Registering an id that already exists for the
    /// event replaces the old listener.
    pub fn on<F, Fut>(&self, event: &str, callback: F, opts: ListenerOptions) -> ListenerId
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let callback: ListenerFn =
            Arc::new(move |payload| Box::pin(callback(payload)) as ListenerFuture);
        let id = opts
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let listener = Listener {
            id: id.clone(),
            module_name: opts.module_name,
            priority: opts.priority,
            seq: self.inner.seq.fetch_add(1, Ordering::Relaxed),
            callback,
        };

        let mut list = self.inner.listeners.entry(event.to_string()).or_default();
        let before = list.len();
        list.retain(|l| l.id != id);
        if list.len() != before {
            tracing::warn!(event, listener = %id, "Listener id already registered; replacing");
        }
        list.push(listener);
        list.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        tracing::debug!(event, listener = %id, total = list.len(), "Listener registered");
        id
    }

    /// Remove one listener by id. Returns whether anything was removed.
    pub fn off(&self, event: &str, id: &str) -> bool {
        let removed = match self.inner.listeners.get_mut(event) {
            Some(mut list) => {
                let before = list.len();
                list.retain(|l| l.id != id);
                list.len() != before
            }
            None => false,
        };
        self.inner.listeners.remove_if(event, |_, list| list.is_empty());
        removed
    }

    /// Drop every listener owned by `module`; returns how many were removed.
    pub fn remove_module_listeners(&self, module: &str) -> usize {
        let mut removed = 0;
        for mut entry in self.inner.listeners.iter_mut() {
            let before = entry.len();
            entry.retain(|l| l.module_name.as_deref() != Some(module));
            removed += before - entry.len();
        }
        self.inner.listeners.retain(|_, list| !list.is_empty());
        if removed > 0 {
            tracing::debug!(module, removed, "Module listeners removed");
        }
        removed
    }

    /// Append a middleware; registration order is execution order.
    pub fn use_middleware(&self, middleware: Arc<dyn EventMiddleware>) {
        self.inner.middleware.write().push(middleware);
    }

    pub fn use_fn<F>(&self, f: F)
    where
        F: Fn(&str, Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.use_middleware(Arc::new(FnMiddleware(f)));
    }

    pub async fn emit(&self, event: &str, payload: Value, opts: EmitOptions) -> EmitReport {
        self.inner
            .counters
            .record_emit(event, opts.source_module.as_deref());

        let listeners = self.snapshot(event, opts.target_module.as_deref());
        if listeners.is_empty() {
            tracing::trace!(event, "No listeners");
            return if opts.wait_for_all {
                EmitReport::Settled(Vec::new())
            } else {
                EmitReport::Dispatched { listeners: 0 }
            };
        }

        let count = listeners.len();
        if opts.wait_for_all {
            let payload = self.apply_middleware(event, payload).await;
            EmitReport::Settled(self.dispatch(event, listeners, payload).await)
        } else {
            let bus = self.clone();
            let event = event.to_string();
            tokio::spawn(async move {
                let payload = bus.apply_middleware(&event, payload).await;
                bus.dispatch(&event, listeners, payload).await;
            });
            EmitReport::Dispatched { listeners: count }
        }
    }

    /// Synchronous fire-and-forget emission.
    pub fn publish(&self, event: &str, payload: Value) {
        self.publish_with(event, payload, EmitOptions::default());
    }

    pub fn publish_with(&self, event: &str, payload: Value, opts: EmitOptions) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let bus = self.clone();
                let event = event.to_string();
                handle.spawn(async move {
                    bus.emit(&event, payload, opts.wait_for_all()).await;
                });
            }
            Err(_) => tracing::warn!(event, "No async runtime available; event dropped"),
        }
    }

    /// Emit `target:event`. Only the name changes; delivery is the usual path.
    pub async fn emit_to_module(&self, target: &str, event: &str, payload: Value) -> EmitReport {
        self.emit(&format!("{target}:{event}"), payload, EmitOptions::default())
            .await
    }

    /// Emit `event` and wait for the first `event:response` emission.
    ///
    /// The response listener is registered before emitting and removed on
    /// every exit path.
    pub async fn emit_and_wait(
        &self,
        event: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, EventError> {
        let timeout = timeout.unwrap_or(self.inner.response_timeout);
        let reply_to = response_event(event);
        let (tx, rx) = oneshot::channel::<Value>();
        let slot = Arc::new(Mutex::new(Some(tx)));

        let id = self.on(
            &reply_to,
            move |response| {
                let slot = Arc::clone(&slot);
                async move {
                    let tx = slot.lock().take();
                    if let Some(tx) = tx {
                        let _ = tx.send(response);
                    }
                    Ok(())
                }
            },
            ListenerOptions::new().id(format!("await:{}", uuid::Uuid::new_v4())),
        );

        self.emit(event, payload, EmitOptions::default()).await;
        let result = tokio::time::timeout(timeout, rx).await;
        self.off(&reply_to, &id);

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(EventError::ResponseDropped {
                event: event.to_string(),
            }),
            Err(_) => {
                tracing::warn!(event, ?timeout, "emit_and_wait timed out");
                Err(EventError::Timeout {
                    event: event.to_string(),
                    timeout,
                })
            }
        }
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.listeners.get(event).map_or(0, |l| l.len())
    }

    /// Event names with at least one listener, sorted.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .listeners
            .iter()
            .filter(|e| !e.value().is_empty())
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Listeners of `event` in invocation order.
    pub fn listeners(&self, event: &str) -> Vec<ListenerInfo> {
        self.inner
            .listeners
            .get(event)
            .map(|list| list.iter().map(Listener::info).collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> EventStats {
        self.inner.counters.snapshot()
    }

    pub fn response_timeout(&self) -> Duration {
        self.inner.response_timeout
    }

    fn snapshot(&self, event: &str, target: Option<&str>) -> Vec<Listener> {
        let Some(list) = self.inner.listeners.get(event) else {
            return Vec::new();
        };
        list.iter()
            .filter(|l| target.is_none() || l.module_name.as_deref() == target)
            .cloned()
            .collect()
    }

    async fn apply_middleware(&self, event: &str, mut payload: Value) -> Value {
        let pipeline: Vec<Arc<dyn EventMiddleware>> = self.inner.middleware.read().clone();
        for (index, mw) in pipeline.iter().enumerate() {
            let step = AssertUnwindSafe(mw.process(event, payload.clone())).catch_unwind();
            let result = match step.await {
                Ok(result) => result,
                Err(panic) => Err(anyhow::anyhow!(
                    "middleware panicked: {}",
                    crate::panic_message(panic.as_ref())
                )),
            };
            match result {
                Ok(next) => payload = next,
                Err(e) => {
                    tracing::warn!(event, middleware = index, error = %e, "Middleware failed; keeping previous payload");
                }
            }
        }
        payload
    }

    /// Invoke `listeners` concurrently on the current task. Futures are
    /// created and first polled in list order.
    async fn dispatch(
        &self,
        event: &str,
        listeners: Vec<Listener>,
        payload: Value,
    ) -> Vec<ListenerOutcome> {
        let calls = listeners.into_iter().map(|listener| {
            let payload = payload.clone();
            async move {
                let callback = Arc::clone(&listener.callback);
                let call = async move { callback(payload).await };
                let result = match AssertUnwindSafe(call).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Err(anyhow::anyhow!(
                        "listener panicked: {}",
                        crate::panic_message(panic.as_ref())
                    )),
                };
                let error = match result {
                    Ok(()) => {
                        self.inner.counters.record_invocation();
                        None
                    }
                    Err(e) => {
                        self.inner.counters.record_failure();
                        tracing::warn!(
                            event,
                            listener = %listener.id,
                            module = listener.module_name.as_deref().unwrap_or("-"),
                            error = %e,
                            "Event listener failed"
                        );
                        Some(format!("{e:#}"))
                    }
                };
                ListenerOutcome {
                    listener_id: listener.id,
                    module: listener.module_name,
                    error,
                }
            }
        });
        join_all(calls).await
    }
}
