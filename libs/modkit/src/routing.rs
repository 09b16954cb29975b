use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use axum::Router;
use parking_lot::Mutex;

/// Shared HTTP routing surface. Modules attach their routes during
/// `initialize`; the host takes the composed router once modules are up.
/// Route correctness is not inspected here.
#[derive(Clone, Default)]
pub struct RouterHandle {
    inner: Arc<Mutex<Surface>>,
}

#[derive(Default)]
struct Surface {
    router: Router,
    prefixes: BTreeSet<String>,
}

impl Surface {
    /// Compose on a copy so a conflicting mount leaves earlier routes intact.
    fn compose(&mut self, what: &str, f: impl FnOnce(Router) -> Router) -> anyhow::Result<()> {
        let next = catch_unwind(AssertUnwindSafe(|| f(self.router.clone()))).map_err(|panic| {
            anyhow::anyhow!("cannot {what}: {}", crate::panic_message(panic.as_ref()))
        })?;
        self.router = next;
        Ok(())
    }
}

fn normalize_prefix(prefix: &str) -> Option<String> {
    let trimmed = prefix.trim_matches('/');
    (!trimmed.is_empty()).then(|| format!("/{trimmed}"))
}

impl std::fmt::Debug for RouterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterHandle").finish_non_exhaustive()
    }
}

impl RouterHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `router` under `prefix` (e.g. the module's own name). Each
    /// prefix can be mounted once per composed router.
    pub fn nest(&self, prefix: &str, router: Router) -> anyhow::Result<()> {
        let Some(path) = normalize_prefix(prefix) else {
            anyhow::bail!("route prefix must not be empty; use merge() for root routes");
        };
        let mut surface = self.inner.lock();
        if surface.prefixes.contains(&path) {
            anyhow::bail!("routes already mounted under {path}");
        }
        surface.compose(&format!("nest routes under {path}"), |current| {
            current.nest(&path, router)
        })?;
        surface.prefixes.insert(path.clone());
        tracing::debug!(prefix = %path, "Routes nested");
        Ok(())
    }

    pub fn is_mounted(&self, prefix: &str) -> bool {
        normalize_prefix(prefix).is_some_and(|p| self.inner.lock().prefixes.contains(&p))
    }

    /// Merge root-level routes. Overlapping routes are rejected and the
    /// composed router is left as it was.
    pub fn merge(&self, router: Router) -> anyhow::Result<()> {
        self.inner
            .lock()
            .compose("merge routes", |current| current.merge(router))
    }

    /// Take the composed router, leaving an empty one behind.
    pub fn take(&self) -> Router {
        let mut surface = self.inner.lock();
        surface.prefixes.clear();
        std::mem::take(&mut surface.router)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode, routing::get};
    use tower::ServiceExt;

    #[tokio::test]
    async fn nested_routes_are_served_under_prefix() {
        let handle = RouterHandle::new();
        handle
            .nest("/tasks/", Router::new().route("/ping", get(|| async { "pong" })))
            .unwrap();
        handle
            .merge(Router::new().route("/root", get(|| async { "root" })))
            .unwrap();

        let app = handle.take();
        let res = app
            .clone()
            .oneshot(Request::get("/tasks/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let res = app
            .oneshot(Request::get("/root").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn conflicting_merge_keeps_earlier_routes() {
        let handle = RouterHandle::new();
        handle
            .merge(Router::new().route("/shared", get(|| async { "a" })))
            .unwrap();
        handle
            .nest("a", Router::new().route("/ping", get(|| async { "pong" })))
            .unwrap();

        let err = handle
            .merge(Router::new().route("/shared", get(|| async { "b" })))
            .unwrap_err();
        assert!(err.to_string().contains("merge routes"));

        let res = handle
            .take()
            .oneshot(Request::get("/a/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[test]
    fn empty_prefix_is_rejected() {
        let handle = RouterHandle::new();
        assert!(handle.nest("/", Router::new()).is_err());
    }

    #[test]
    fn prefix_mounts_once_per_router() {
        let handle = RouterHandle::new();
        handle.nest("projects", Router::new()).unwrap();
        assert!(handle.is_mounted("/projects"));
        assert!(handle.nest("/projects/", Router::new()).is_err());

        let _ = handle.take();
        assert!(!handle.is_mounted("projects"));
        handle.nest("projects", Router::new()).unwrap();
    }
}
