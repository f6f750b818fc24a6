//! Kdecl reconcile: bind a custom-resource type to a manifest loader and drive the
//! fetch → build → apply → watch → status cycle.
//!
//! The host runtime is reached only through the traits in [`collab`]; kube-backed
//! implementations live in `kdecl-kubehub` and `kdecl-apply`.

#![forbid(unsafe_code)]

use kdecl_manifest::ManifestError;

pub mod collab;
pub mod labels;
pub mod loaders;
pub mod options;
mod reconciler;
pub mod requeue;
pub mod transforms;

pub use collab::{Applier, DynamicWatcher, LoggingSink, ManifestLoader, NoopStatus, ObjectClient, Sink, StatusHook, WatchFilter};
pub use labels::{source_labels, static_labels};
pub use loaders::{render_template_operation, DirectoryManifestLoader, StaticManifestLoader, TemplatedManifestLoader};
pub use options::{
    source_as_owner, with_label_maker, with_manifest_controller, with_object_transformation, with_owner, with_preserve_namespace,
    with_prune, with_raw_manifest_operation, with_sink, with_status, Defaults, LabelMaker, LoaderFactory, ObjectTransform, Owner, OwnerFn,
    RawManifestOperation, ReconcilerOption, ReconcilerParams, ValidationError,
};
pub use reconciler::{Host, Reconciler};
pub use requeue::{backoff, resync_interval, FailureBackoff};
pub use transforms::{application_components, image_registry};

/// Failure of one reconcile pass.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("fetching object: {0:#}")]
    Get(anyhow::Error),
    #[error("preflight: {0:#}")]
    Preflight(anyhow::Error),
    #[error("loading manifest: {0:#}")]
    Load(anyhow::Error),
    #[error("raw manifest operation {index}: {cause:#}")]
    RawOperation { index: usize, cause: anyhow::Error },
    #[error("parsing manifest: {0}")]
    Parse(ManifestError),
    #[error("object transformation {index}: {cause:#}")]
    Transform { index: usize, cause: anyhow::Error },
    #[error("adding labels: {0}")]
    Labels(ManifestError),
    #[error("setting owner references: {0}")]
    Owner(ManifestError),
    #[error("invalid manifest: {0}")]
    Invalid(ManifestError),
    #[error("serializing manifest: {0}")]
    Serialize(ManifestError),
    #[error("refusing to prune with an empty label selector")]
    EmptyPruneSelector,
    #[error("apply: {0:#}")]
    Apply(anyhow::Error),
    #[error("sink: {0:#}")]
    Sink(anyhow::Error),
    #[error("cancelled")]
    Cancelled,
}

impl ReconcileError {
    /// Transient failures are expected to clear on their own and are reported as in progress.
    /// Every failure is requeued with backoff by the controller.
    pub fn is_transient(&self) -> bool {
        matches!(self, ReconcileError::Get(_) | ReconcileError::Load(_) | ReconcileError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ReconcileError::Load(anyhow::anyhow!("timeout")).is_transient());
        assert!(ReconcileError::Cancelled.is_transient());
        assert!(!ReconcileError::Apply(anyhow::anyhow!("exit status 1")).is_transient());
        assert!(!ReconcileError::EmptyPruneSelector.is_transient());
    }

    #[test]
    fn messages_carry_the_cause_chain() {
        let e = ReconcileError::Load(anyhow::anyhow!("connection refused").context("reading channel"));
        assert_eq!(e.to_string(), "loading manifest: reading channel: connection refused");
    }
}
