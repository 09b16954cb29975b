mod diagnostics;
mod host_runtime;
mod runner;
mod shutdown;

pub use diagnostics::{DependencyReport, RuntimeDiagnostics};
pub use host_runtime::{
    ModuleRuntime, PhaseSummary, RuntimeBuilder, ShutdownSummary, RUNTIME_STARTED,
    RUNTIME_STOPPING,
};
pub use runner::{run, HostFn, RunOptions, ShutdownOptions};
pub use shutdown::wait_for_shutdown;
