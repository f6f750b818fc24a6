//! Kdecl core types: object identity, label selectors and the declarative object seam.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use kube::core::DynamicObject;
use serde::{Deserialize, Serialize};

pub use kube::core::GroupVersionKind;

pub mod selector;

pub use selector::{escape_value, label_selector};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid gvk key: {0} (expect v1/Kind or group/v1/Kind)")]
    InvalidGvkKey(String),
    #[error("invalid apiVersion: {0:?}")]
    InvalidApiVersion(String),
}

/// Group + Kind, the version-independent identity of a schema.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), kind: kind.into() }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}.{}", self.kind, self.group)
        }
    }
}

/// Split an `apiVersion` into `(group, version)`; the core group is empty.
pub fn parse_api_version(api_version: &str) -> Result<(&str, &str), KeyError> {
    let (group, version) = match api_version.split_once('/') {
        Some((g, v)) => (g, v),
        None => ("", api_version),
    };
    if version.is_empty() || version.contains('/') {
        return Err(KeyError::InvalidApiVersion(api_version.to_string()));
    }
    Ok((group, version))
}

/// Stable string key for a GVK: `v1/Kind` or `group/v1/Kind`.
pub fn gvk_key(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        format!("{}/{}", gvk.version, gvk.kind)
    } else {
        format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
    }
}

pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind, KeyError> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => Ok(GroupVersionKind::gvk("", version, kind)),
        [group, version, kind] if !version.is_empty() && !kind.is_empty() => Ok(GroupVersionKind::gvk(group, version, kind)),
        _ => Err(KeyError::InvalidGvkKey(key.to_string())),
    }
}

/// Namespace + name of a reconcile request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string), name: name.into() }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// The custom-resource instance a reconciler works on.
///
/// Implementations belong to the host runtime; the engine only reads identity,
/// labels and the raw body (loaders and templates may consult `spec`).
pub trait DeclarativeObject: Send + Sync {
    fn name(&self) -> &str;
    fn namespace(&self) -> Option<&str>;
    fn uid(&self) -> Option<&str>;
    fn generation(&self) -> Option<i64>;
    fn labels(&self) -> BTreeMap<String, String>;
    /// `None` when the concrete type cannot be resolved.
    fn gvk(&self) -> Option<GroupVersionKind>;
    fn body(&self) -> serde_json::Value;

    fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace(), self.name())
    }
}

impl DeclarativeObject for DynamicObject {
    fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("")
    }

    fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    fn uid(&self) -> Option<&str> {
        self.metadata.uid.as_deref()
    }

    fn generation(&self) -> Option<i64> {
        self.metadata.generation
    }

    fn labels(&self) -> BTreeMap<String, String> {
        self.metadata.labels.clone().unwrap_or_default()
    }

    fn gvk(&self) -> Option<GroupVersionKind> {
        let types = self.types.as_ref()?;
        let (group, version) = parse_api_version(&types.api_version).ok()?;
        if types.kind.is_empty() {
            return None;
        }
        Some(GroupVersionKind::gvk(group, version, &types.kind))
    }

    fn body(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub mod prelude {
    pub use super::{gvk_key, label_selector, parse_gvk_key, DeclarativeObject, GroupKind, GroupVersionKind, ObjectKey};
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::{ApiResource, ObjectMeta};

    #[test]
    fn gvk_keys_roundtrip() {
        let core = parse_gvk_key("v1/ConfigMap").unwrap();
        assert_eq!(core.group, "");
        assert_eq!(gvk_key(&core), "v1/ConfigMap");

        let apps = parse_gvk_key("apps/v1/Deployment").unwrap();
        assert_eq!(apps.group, "apps");
        assert_eq!(gvk_key(&apps), "apps/v1/Deployment");

        assert!(parse_gvk_key("Deployment").is_err());
        assert!(parse_gvk_key("a/b/c/d").is_err());
    }

    #[test]
    fn api_version_split() {
        assert_eq!(parse_api_version("v1").unwrap(), ("", "v1"));
        assert_eq!(parse_api_version("apps/v1").unwrap(), ("apps", "v1"));
        assert!(parse_api_version("").is_err());
        assert!(parse_api_version("a/b/c").is_err());
    }

    #[test]
    fn dynamic_object_exposes_identity() {
        let gvk = GroupVersionKind::gvk("addons.example.org", "v1alpha1", "Dashboard");
        let ar = ApiResource::from_gvk(&gvk);
        let mut obj = DynamicObject::new("dash", &ar).within("tools");
        obj.metadata = ObjectMeta {
            uid: Some("1234".into()),
            labels: Some(BTreeMap::from([("team".to_string(), "infra".to_string())])),
            ..obj.metadata
        };
        assert_eq!(obj.name(), "dash");
        assert_eq!(obj.namespace(), Some("tools"));
        assert_eq!(obj.uid(), Some("1234"));
        assert_eq!(obj.labels().get("team").map(String::as_str), Some("infra"));
        assert_eq!(obj.gvk(), Some(gvk));
        assert_eq!(obj.key().to_string(), "tools/dash");
    }
}
