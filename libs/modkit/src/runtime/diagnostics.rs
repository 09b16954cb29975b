use std::collections::BTreeMap;

use serde::Serialize;

use crate::dependency::MissingDependency;
use crate::events::EventStats;
use crate::lifecycle::ModuleRecord;
use crate::registry::ServiceInfo;

/// Read-only operator view of a running runtime.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeDiagnostics {
    pub modules: Vec<ModuleRecord>,
    pub services: Vec<ServiceInfo>,
    pub events: EventStats,
    /// Listener count per event name.
    pub subscriptions: BTreeMap<String, usize>,
    pub dependencies: DependencyReport,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DependencyReport {
    pub cycle: Option<Vec<String>>,
    pub missing: Vec<MissingDependency>,
}
