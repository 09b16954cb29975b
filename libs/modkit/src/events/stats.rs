use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

#[derive(Default)]
pub(crate) struct EventCounters {
    emitted: AtomicU64,
    invocations: AtomicU64,
    failures: AtomicU64,
    per_event: DashMap<String, u64>,
    per_module: DashMap<String, u64>,
}

impl EventCounters {
    pub(crate) fn record_emit(&self, event: &str, source_module: Option<&str>) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        *self.per_event.entry(event.to_string()).or_insert(0) += 1;
        if let Some(module) = source_module {
            *self.per_module.entry(module.to_string()).or_insert(0) += 1;
        }
    }

    pub(crate) fn record_invocation(&self) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> EventStats {
        EventStats {
            events_emitted: self.emitted.load(Ordering::Relaxed),
            listener_invocations: self.invocations.load(Ordering::Relaxed),
            listener_failures: self.failures.load(Ordering::Relaxed),
            per_event: self
                .per_event
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            per_module: self
                .per_module
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        }
    }
}

/// Point-in-time copy of the bus counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventStats {
    pub events_emitted: u64,
    /// Listener invocations that completed successfully.
    pub listener_invocations: u64,
    pub listener_failures: u64,
    pub per_event: BTreeMap<String, u64>,
    /// Emissions attributed to a source module.
    pub per_module: BTreeMap<String, u64>,
}
