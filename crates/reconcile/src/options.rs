//! Reconciler parameters and the option functions that populate them.

use std::collections::BTreeMap;
use std::sync::Arc;

use kdecl_core::{DeclarativeObject, GroupVersionKind};
use kdecl_manifest::{ManifestObject, ManifestObjects};

use crate::collab::{ManifestLoader, Sink, StatusHook};

pub type LabelMaker = Arc<dyn Fn(&dyn DeclarativeObject) -> BTreeMap<String, String> + Send + Sync>;
pub type OwnerFn = Arc<dyn Fn(&dyn DeclarativeObject, &ManifestObject, &ManifestObjects) -> Option<Owner> + Send + Sync>;
pub type RawManifestOperation = Arc<dyn Fn(&dyn DeclarativeObject, String) -> anyhow::Result<String> + Send + Sync>;
pub type ObjectTransform = Arc<dyn Fn(&dyn DeclarativeObject, &mut ManifestObjects) -> anyhow::Result<()> + Send + Sync>;
pub type ReconcilerOption = Arc<dyn Fn(&mut ReconcilerParams) + Send + Sync>;
pub type LoaderFactory = Arc<dyn Fn() -> anyhow::Result<Arc<dyn ManifestLoader>> + Send + Sync>;

/// The object an owner reference points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub gvk: Option<GroupVersionKind>,
    pub name: String,
    pub namespace: Option<String>,
    pub uid: Option<String>,
}

impl Owner {
    pub fn from_object(o: &dyn DeclarativeObject) -> Self {
        Self {
            gvk: o.gvk(),
            name: o.name().to_string(),
            namespace: o.namespace().map(str::to_string),
            uid: o.uid().map(str::to_string),
        }
    }
}

/// Every object is owned by the instance being reconciled.
pub fn source_as_owner() -> OwnerFn {
    Arc::new(|instance, _, _| Some(Owner::from_object(instance)))
}

#[derive(Clone, Default)]
pub struct ReconcilerParams {
    pub prune: bool,
    pub preserve_namespace: bool,
    pub owner_fn: Option<OwnerFn>,
    pub label_maker: Option<LabelMaker>,
    pub status: Option<Arc<dyn StatusHook>>,
    pub sink: Option<Arc<dyn Sink>>,
    pub raw_manifest_operations: Vec<RawManifestOperation>,
    pub object_transformations: Vec<ObjectTransform>,
    pub gvk: Option<GroupVersionKind>,
    pub manifest_controller: Option<Arc<dyn ManifestLoader>>,
}

impl ReconcilerParams {
    pub(crate) fn problems(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.prune && self.label_maker.is_none() {
            out.push("prune requires a label maker".to_string());
        }
        if self.manifest_controller.is_none() {
            out.push("a manifest controller is required".to_string());
        }
        out
    }
}

/// Process-wide option lists and loader, handed to every [`crate::Reconciler::new`].
///
/// `begin` runs before the per-controller options and `end` after them.
#[derive(Clone, Default)]
pub struct Defaults {
    pub begin: Vec<ReconcilerOption>,
    pub end: Vec<ReconcilerOption>,
    pub manifest_loader: Option<LoaderFactory>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid reconciler options: {}", .0.join("; "))]
pub struct ValidationError(pub Vec<String>);

pub fn with_prune(prune: bool) -> ReconcilerOption {
    Arc::new(move |p| p.prune = prune)
}

/// Apply into the namespaces named by the manifest instead of the instance's.
pub fn with_preserve_namespace() -> ReconcilerOption {
    Arc::new(|p| p.preserve_namespace = true)
}

pub fn with_owner(f: OwnerFn) -> ReconcilerOption {
    Arc::new(move |p| p.owner_fn = Some(f.clone()))
}

pub fn with_label_maker(f: LabelMaker) -> ReconcilerOption {
    Arc::new(move |p| p.label_maker = Some(f.clone()))
}

pub fn with_status(status: Arc<dyn StatusHook>) -> ReconcilerOption {
    Arc::new(move |p| p.status = Some(status.clone()))
}

pub fn with_sink(sink: Arc<dyn Sink>) -> ReconcilerOption {
    Arc::new(move |p| p.sink = Some(sink.clone()))
}

pub fn with_raw_manifest_operation(op: RawManifestOperation) -> ReconcilerOption {
    Arc::new(move |p| p.raw_manifest_operations.push(op.clone()))
}

pub fn with_object_transformation(t: ObjectTransform) -> ReconcilerOption {
    Arc::new(move |p| p.object_transformations.push(t.clone()))
}

pub fn with_manifest_controller(loader: Arc<dyn ManifestLoader>) -> ReconcilerOption {
    Arc::new(move |p| p.manifest_controller = Some(loader.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::static_labels;
    use crate::loaders::StaticManifestLoader;

    fn apply(opts: &[ReconcilerOption]) -> ReconcilerParams {
        let mut p = ReconcilerParams::default();
        for o in opts {
            o(&mut p);
        }
        p
    }

    #[test]
    fn prune_without_labels_is_reported() {
        let p = apply(&[with_prune(true), with_manifest_controller(Arc::new(StaticManifestLoader::new("")))]);
        assert_eq!(p.problems(), vec!["prune requires a label maker"]);

        let p = apply(&[
            with_prune(true),
            with_label_maker(static_labels(BTreeMap::from([("a".to_string(), "b".to_string())]))),
            with_manifest_controller(Arc::new(StaticManifestLoader::new(""))),
        ]);
        assert!(p.problems().is_empty());
    }

    #[test]
    fn problems_are_joined() {
        let p = apply(&[with_prune(true)]);
        let err = ValidationError(p.problems());
        assert_eq!(
            err.to_string(),
            "invalid reconciler options: prune requires a label maker; a manifest controller is required"
        );
    }

    #[test]
    fn list_options_append_in_order() {
        let p = apply(&[
            with_raw_manifest_operation(Arc::new(|_, s| Ok(s))),
            with_raw_manifest_operation(Arc::new(|_, s| Ok(s))),
            with_object_transformation(Arc::new(|_, _| Ok(()))),
        ]);
        assert_eq!(p.raw_manifest_operations.len(), 2);
        assert_eq!(p.object_transformations.len(), 1);
    }
}
