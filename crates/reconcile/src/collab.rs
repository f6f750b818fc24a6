//! Collaborator traits: everything the reconciler needs from the host runtime.

use kdecl_core::{gvk_key, DeclarativeObject, GroupVersionKind, ObjectKey};
use kdecl_manifest::ManifestObjects;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::ReconcileError;

/// Reads the custom resource a request names.
#[async_trait::async_trait]
pub trait ObjectClient: Send + Sync {
    /// `Ok(None)` when the object does not exist.
    async fn get(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> anyhow::Result<Option<Box<dyn DeclarativeObject>>>;
}

/// Produces the raw (multi-document) manifest for an instance.
#[async_trait::async_trait]
pub trait ManifestLoader: Send + Sync {
    async fn resolve_manifest(&self, cancel: &CancellationToken, instance: &dyn DeclarativeObject) -> anyhow::Result<String>;
}

/// The apply tool. `namespace` of `None` leaves namespacing to the manifest.
#[async_trait::async_trait]
pub trait Applier: Send + Sync {
    async fn apply(
        &self,
        cancel: &CancellationToken,
        namespace: Option<&str>,
        manifest: &str,
        extra_args: &[String],
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchFilter {
    pub label_selector: String,
    pub namespace: Option<String>,
}

/// Dynamic watch facility: events on matching objects enqueue `target`.
#[async_trait::async_trait]
pub trait DynamicWatcher: Send + Sync {
    async fn add(&self, gvk: &GroupVersionKind, filter: &WatchFilter, target: &ObjectKey) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
pub trait StatusHook: Send + Sync {
    /// A failure stops the pass before anything is built.
    async fn preflight(&self, _cancel: &CancellationToken, _instance: &dyn DeclarativeObject) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs after every pass that got past the build phase; `outcome` is the error, if any.
    async fn reconciled(
        &self,
        instance: &dyn DeclarativeObject,
        objects: &ManifestObjects,
        outcome: Option<&ReconcileError>,
    ) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    async fn notify(&self, instance: &dyn DeclarativeObject, objects: &ManifestObjects) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStatus;

#[async_trait::async_trait]
impl StatusHook for NoopStatus {
    async fn reconciled(&self, _: &dyn DeclarativeObject, _: &ManifestObjects, _: Option<&ReconcileError>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Records the applied inventory at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

#[async_trait::async_trait]
impl Sink for LoggingSink {
    async fn notify(&self, instance: &dyn DeclarativeObject, objects: &ManifestObjects) -> anyhow::Result<()> {
        for o in objects.iter() {
            info!(
                owner = %instance.key(),
                gvk = %gvk_key(&o.gvk()),
                ns = ?o.namespace(),
                name = %o.name(),
                "applied object"
            );
        }
        Ok(())
    }
}
