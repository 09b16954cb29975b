//! Full process cycle: bootstrap → init → start → serve → wait → shutdown.
//!
//! Shutdown can be driven by OS signals, an external `CancellationToken`,
//! or an arbitrary future.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::Router;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::runtime::host_runtime::ModuleRuntime;
use crate::runtime::shutdown;

/// How the runner decides when to stop.
pub enum ShutdownOptions {
    /// Listen for OS signals (Ctrl+C / SIGTERM).
    Signals,
    /// An external token controls the lifecycle.
    Token(CancellationToken),
    /// Shut down once this future completes.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

/// Serves the composed module router until the token is cancelled.
pub type HostFn =
    Box<dyn FnOnce(Router, CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

pub struct RunOptions {
    pub runtime: Arc<ModuleRuntime>,
    pub shutdown: ShutdownOptions,
    /// Optional HTTP host; without one the runtime just waits for shutdown.
    pub host: Option<HostFn>,
}

pub async fn run(opts: RunOptions) -> anyhow::Result<()> {
    let runtime = opts.runtime;
    let cancel = runtime.cancellation_token().clone();

    match opts.shutdown {
        ShutdownOptions::Signals => {
            let c = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = shutdown::wait_for_shutdown().await {
                    tracing::warn!(error = %e, "shutdown: signal waiter failed; falling back to ctrl_c()");
                    let _ = tokio::signal::ctrl_c().await;
                }
                c.cancel();
            });
        }
        ShutdownOptions::Future(waiter) => {
            let c = cancel.clone();
            tokio::spawn(async move {
                waiter.await;
                tracing::info!("shutdown: external future completed");
                c.cancel();
            });
        }
        ShutdownOptions::Token(external) => {
            let c = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = external.cancelled() => c.cancel(),
                    _ = c.cancelled() => {}
                }
            });
        }
    }

    let report = runtime.bootstrap().await?;
    for failure in &report.failures {
        tracing::warn!(module = %failure.name, error = %failure.error, "Module excluded");
    }
    runtime.initialize_all().await;
    runtime.start_all().await;
    runtime.announce_started().await;

    let mut host_task = opts.host.map(|host| {
        let router = runtime.router().take();
        tokio::spawn(host(router, cancel.clone()))
    });

    let mut host_result = None;
    match host_task.as_mut() {
        Some(task) => {
            tokio::select! {
                _ = cancel.cancelled() => {}
                joined = task => {
                    tracing::warn!("host exited before shutdown was requested");
                    host_result = Some(joined);
                    cancel.cancel();
                }
            }
        }
        None => cancel.cancelled().await,
    }

    tracing::info!("Shutting down");
    runtime.shutdown().await;

    let joined = match (host_result, host_task) {
        (Some(joined), _) => Some(joined),
        (None, Some(task)) => Some(task.await),
        (None, None) => None,
    };
    match joined {
        Some(Ok(result)) => result,
        Some(Err(join_err)) => Err(anyhow::anyhow!("host task failed: {join_err}")),
        None => Ok(()),
    }
}
