//! Label makers. Their output scopes pruning and watches, so keep it stable per instance.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::options::LabelMaker;

/// `<group>/<kind lowercased>: <instance name>`; empty when the instance type is unknown.
pub fn source_labels() -> LabelMaker {
    Arc::new(|instance| {
        let Some(gvk) = instance.gvk() else { return BTreeMap::new() };
        BTreeMap::from([(format!("{}/{}", gvk.group, gvk.kind.to_lowercase()), instance.name().to_string())])
    })
}

pub fn static_labels(labels: BTreeMap<String, String>) -> LabelMaker {
    Arc::new(move |_| labels.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kdecl_core::{DeclarativeObject, GroupVersionKind};
    use kube::core::{ApiResource, DynamicObject};

    #[test]
    fn source_labels_use_group_and_kind() {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("addons.example.org", "v1alpha1", "Dashboard"));
        let obj = DynamicObject::new("dash", &ar).within("tools");
        let labels = source_labels()(&obj as &dyn DeclarativeObject);
        assert_eq!(labels, BTreeMap::from([("addons.example.org/dashboard".to_string(), "dash".to_string())]));
    }

    #[test]
    fn unknown_type_yields_no_labels() {
        let mut obj = DynamicObject::new("dash", &ApiResource::from_gvk(&GroupVersionKind::gvk("g", "v1", "K")));
        obj.types = None;
        assert!(obj.gvk().is_none());
        assert!(source_labels()(&obj as &dyn DeclarativeObject).is_empty());
    }
}
