use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use kdecl_core::DeclarativeObject;
use kdecl_manifest::ManifestObjects;
use kdecl_reconcile::{ReconcileError, StatusHook};
use kube::api::{Patch, PatchParams};
use serde_json::{json, Value as Json};
use tracing::debug;

use crate::ApiResolver;

/// Writes the outcome of each pass to the instance's status subresource.
pub struct KubeStatus {
    resolver: Arc<ApiResolver>,
}

impl KubeStatus {
    pub fn new(resolver: Arc<ApiResolver>) -> Self {
        Self { resolver }
    }
}

/// Merge patch for `status`: `healthy`, `phase`, `errors` and `observedGeneration`.
pub fn status_patch(generation: Option<i64>, outcome: Option<&ReconcileError>) -> Json {
    let (healthy, phase, errors) = match outcome {
        None => (true, "Current", Vec::new()),
        Some(e) if e.is_transient() => (false, "InProgress", vec![e.to_string()]),
        Some(e) => (false, "Failed", vec![e.to_string()]),
    };
    let mut status = json!({ "healthy": healthy, "phase": phase, "errors": errors });
    if let Some(g) = generation {
        status["observedGeneration"] = json!(g);
    }
    json!({ "status": status })
}

#[async_trait::async_trait]
impl StatusHook for KubeStatus {
    async fn reconciled(
        &self,
        instance: &dyn DeclarativeObject,
        objects: &ManifestObjects,
        outcome: Option<&ReconcileError>,
    ) -> Result<()> {
        let gvk = instance.gvk().ok_or_else(|| anyhow!("instance {} has no resolvable type", instance.key()))?;
        let api = self.resolver.api(&gvk, instance.namespace()).await?;
        let patch = status_patch(instance.generation(), outcome);
        api.patch_status(instance.name(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("patching status of {}", instance.key()))?;
        debug!(key = %instance.key(), objects = objects.len(), healthy = outcome.is_none(), "status updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_clears_errors() {
        assert_eq!(
            status_patch(Some(4), None),
            json!({ "status": { "healthy": true, "phase": "Current", "errors": [], "observedGeneration": 4 } })
        );
    }

    #[test]
    fn failures_are_classified() {
        let failed = status_patch(None, Some(&ReconcileError::EmptyPruneSelector));
        assert_eq!(failed["status"]["phase"], "Failed");
        assert_eq!(failed["status"]["errors"], json!(["refusing to prune with an empty label selector"]));
        assert!(failed["status"].get("observedGeneration").is_none());

        let pending = status_patch(Some(1), Some(&ReconcileError::Load(anyhow!("timeout"))));
        assert_eq!(pending["status"]["phase"], "InProgress");
        assert_eq!(pending["status"]["healthy"], false);
    }
}
