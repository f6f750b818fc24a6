//! Kdecl manifest model: parse multi-document YAML into an ordered, mutable set of objects.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kdecl_core::{parse_api_version, GroupKind, GroupVersionKind};
use serde_json::{Map, Value as Json};
use tracing::{debug, error};

mod order;
mod taint;

pub use order::default_object_order;
pub use taint::Taint;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("error decoding object {doc_index}: {cause}")]
    Parse { doc_index: usize, cause: String },
    #[error("object {doc_index} is missing apiVersion or kind")]
    MissingTypeMeta { doc_index: usize },
    #[error("manifest too large (>{max} bytes)")]
    TooLarge { max: usize },
    #[error("value cannot be set because {component} is not a mapping")]
    Path { component: String },
    #[error("{field} has unexpected shape: {reason}")]
    Shape { field: String, reason: String },
    #[error("error building json: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("duplicate object {group_kind} {namespace}/{name}")]
    DuplicateObject { group_kind: GroupKind, namespace: String, name: String },
    #[error("invalid taint spec: {0}")]
    InvalidTaint(String),
}

fn max_manifest_bytes() -> usize {
    std::env::var("KDECL_MAX_MANIFEST_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(8_000_000)
}

/// Where the pod spec lives for kinds that embed one.
pub fn pod_spec_path(kind: &str) -> Option<&'static [&'static str]> {
    match kind {
        "Deployment" | "DaemonSet" | "StatefulSet" | "ReplicaSet" | "Job" | "ReplicationController" => {
            Some(&["spec", "template", "spec"])
        }
        "CronJob" => Some(&["spec", "jobTemplate", "spec", "template", "spec"]),
        "Pod" => Some(&["spec"]),
        _ => None,
    }
}

/// One parsed document. `apiVersion`/`kind` in the body are the only source of the type fields,
/// so any mutation of the body is reflected in `group()`, `version()` and `kind()`.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestObject {
    body: Map<String, Json>,
}

impl ManifestObject {
    pub fn from_json(body: Json) -> Result<Self, ManifestError> {
        Self::from_json_at(body, 0)
    }

    fn from_json_at(body: Json, doc_index: usize) -> Result<Self, ManifestError> {
        let body = match body {
            Json::Object(m) => m,
            other => {
                return Err(ManifestError::Parse { doc_index, cause: format!("expected a mapping, got {}", json_type(&other)) });
            }
        };
        let has_type = |k: &str| body.get(k).and_then(|v| v.as_str()).is_some_and(|s| !s.is_empty());
        if !has_type("apiVersion") || !has_type("kind") {
            return Err(ManifestError::MissingTypeMeta { doc_index });
        }
        let o = Self { body };
        if parse_api_version(o.api_version()).is_err() {
            return Err(ManifestError::Parse { doc_index, cause: format!("invalid apiVersion {:?}", o.api_version()) });
        }
        Ok(o)
    }

    pub fn api_version(&self) -> &str {
        self.body.get("apiVersion").and_then(|v| v.as_str()).unwrap_or("")
    }

    pub fn group(&self) -> &str {
        parse_api_version(self.api_version()).map(|(g, _)| g).unwrap_or("")
    }

    pub fn version(&self) -> &str {
        parse_api_version(self.api_version()).map(|(_, v)| v).unwrap_or("")
    }

    pub fn kind(&self) -> &str {
        self.body.get("kind").and_then(|v| v.as_str()).unwrap_or("")
    }

    pub fn group_kind(&self) -> GroupKind {
        GroupKind::new(self.group(), self.kind())
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(self.group(), self.version(), self.kind())
    }

    pub fn name(&self) -> &str {
        self.metadata_str("name").unwrap_or("")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata_str("namespace").filter(|s| !s.is_empty())
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.body.get("metadata").and_then(|m| m.get(key)).and_then(|v| v.as_str())
    }

    pub fn body(&self) -> &Map<String, Json> {
        &self.body
    }

    /// Raw mutable access for transforms that walk the whole tree.
    pub fn body_mut(&mut self) -> &mut Map<String, Json> {
        &mut self.body
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.nested_string_map(&["metadata", "labels"]).unwrap_or_default()
    }

    /// Merge `labels` into `metadata.labels`; existing keys are overwritten, none removed.
    pub fn add_labels(&mut self, labels: &BTreeMap<String, String>) -> Result<(), ManifestError> {
        if labels.is_empty() {
            return Ok(());
        }
        let mut merged = self.labels();
        let mut changed = false;
        for (k, v) in labels {
            if merged.get(k) != Some(v) {
                merged.insert(k.clone(), v.clone());
                changed = true;
            }
        }
        if changed {
            self.set_nested_string_map(&merged, &["metadata", "labels"])?;
        }
        Ok(())
    }

    pub fn owner_references(&self) -> Vec<OwnerReference> {
        self.nested_field(&["metadata", "ownerReferences"])
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    pub fn set_owner_references(&mut self, refs: &[OwnerReference]) -> Result<(), ManifestError> {
        let v = serde_json::to_value(refs)?;
        self.set_nested_field(v, &["metadata", "ownerReferences"])
    }

    pub fn nested_field(&self, fields: &[&str]) -> Option<&Json> {
        let (first, rest) = fields.split_first()?;
        let mut cur = self.body.get(*first)?;
        for f in rest {
            cur = cur.as_object()?.get(*f)?;
        }
        Some(cur)
    }

    /// String map at `fields`; `None` when absent or when any value is not a string.
    pub fn nested_string_map(&self, fields: &[&str]) -> Option<BTreeMap<String, String>> {
        let m = self.nested_field(fields)?.as_object()?;
        m.iter().map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect()
    }

    pub fn set_nested_string_map(&mut self, value: &BTreeMap<String, String>, fields: &[&str]) -> Result<(), ManifestError> {
        let m: Map<String, Json> = value.iter().map(|(k, v)| (k.clone(), Json::String(v.clone()))).collect();
        self.set_nested_field(Json::Object(m), fields)
    }

    /// Set `value` at `fields`, creating intermediate mappings as needed.
    pub fn set_nested_field(&mut self, value: Json, fields: &[&str]) -> Result<(), ManifestError> {
        let Some((last, parents)) = fields.split_last() else {
            return Err(ManifestError::Path { component: String::new() });
        };
        let mut m = &mut self.body;
        for (i, field) in parents.iter().enumerate() {
            let slot = m.entry((*field).to_string()).or_insert_with(|| Json::Object(Map::new()));
            m = match slot {
                Json::Object(inner) => inner,
                _ => return Err(ManifestError::Path { component: fields[..=i].join(".") }),
            };
        }
        m.insert((*last).to_string(), value);
        Ok(())
    }

    pub fn has_pod_spec(&self) -> bool {
        pod_spec_path(self.kind())
            .and_then(|p| self.nested_field(p))
            .is_some_and(|v| v.is_object())
    }

    /// Apply `f` once to the embedded pod spec. Returns `false` when the object carries none.
    pub fn mutate_pod_spec<F, E>(&mut self, mut f: F) -> Result<bool, E>
    where
        F: FnMut(&mut Map<String, Json>) -> Result<(), E>,
        E: From<ManifestError>,
    {
        let Some(path) = pod_spec_path(self.kind()) else { return Ok(false) };
        let mut cur = &mut self.body;
        for (i, field) in path.iter().enumerate() {
            cur = match cur.get_mut(*field) {
                None => return Ok(false),
                Some(Json::Object(m)) => m,
                Some(_) => {
                    return Err(ManifestError::Shape { field: path[..=i].join("."), reason: "not an object".into() }.into());
                }
            };
        }
        f(cur)?;
        Ok(true)
    }

    /// Apply `f` to every entry of `containers` and `initContainers` in the embedded pod spec.
    pub fn mutate_containers<F, E>(&mut self, mut f: F) -> Result<bool, E>
    where
        F: FnMut(&mut Map<String, Json>) -> Result<(), E>,
        E: From<ManifestError>,
    {
        self.mutate_pod_spec(|pod_spec| {
            for list in ["initContainers", "containers"] {
                let Some(entries) = pod_spec.get_mut(list) else { continue };
                let Json::Array(entries) = entries else {
                    return Err(ManifestError::Shape { field: list.into(), reason: "not a list".into() }.into());
                };
                for entry in entries.iter_mut() {
                    match entry {
                        Json::Object(container) => f(container)?,
                        _ => return Err(ManifestError::Shape { field: list.into(), reason: "entry is not an object".into() }.into()),
                    }
                }
            }
            Ok(())
        })
    }

    pub fn to_json_string(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string(&self.body)?)
    }

    pub fn to_value(&self) -> Json {
        Json::Object(self.body.clone())
    }
}

fn json_type(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "sequence",
        Json::Object(_) => "mapping",
    }
}

/// Ordered collection; order is the apply order once `sort` has run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestObjects {
    pub items: Vec<ManifestObject>,
}

impl ManifestObjects {
    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn iter(&self) -> std::slice::Iter<'_, ManifestObject> { self.items.iter() }
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, ManifestObject> { self.items.iter_mut() }

    /// Serialize every object as JSON, separated by `---` lines. The result parses back with `parse_objects`.
    pub fn json_manifest(&self) -> Result<String, ManifestError> {
        let mut out = String::new();
        for (i, item) in self.items.iter().enumerate() {
            if i != 0 {
                out.push_str("\n---\n");
            }
            out.push_str(&item.to_json_string()?);
        }
        Ok(out)
    }

    /// Stable sort by `rank(group, kind)`, ties broken by group, kind and name.
    pub fn sort<F>(&mut self, rank: F)
    where
        F: Fn(&str, &str) -> i32,
    {
        self.items.sort_by_cached_key(|o| {
            (rank(o.group(), o.kind()), o.group().to_string(), o.kind().to_string(), o.name().to_string())
        });
    }

    /// Reject duplicate `(groupKind, namespace, name)` identities.
    pub fn validate(&self) -> Result<(), ManifestError> {
        let mut seen: HashMap<(GroupKind, &str, &str), usize> = HashMap::new();
        for o in &self.items {
            let key = (o.group_kind(), o.namespace().unwrap_or(""), o.name());
            let count = seen.entry(key).or_insert(0);
            *count += 1;
            if *count == 2 {
                return Err(ManifestError::DuplicateObject {
                    group_kind: o.group_kind(),
                    namespace: o.namespace().unwrap_or("").to_string(),
                    name: o.name().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Sorted, de-duplicated group/kinds across all items.
    pub fn group_kinds(&self) -> Vec<GroupKind> {
        let mut gks: Vec<_> = self.items.iter().map(ManifestObject::group_kind).collect();
        gks.sort();
        gks.dedup();
        gks
    }
}

impl IntoIterator for ManifestObjects {
    type Item = ManifestObject;
    type IntoIter = std::vec::IntoIter<ManifestObject>;
    fn into_iter(self) -> Self::IntoIter { self.items.into_iter() }
}

/// Split on `---` lines (CRLF tolerant) and decode each non-empty document.
pub fn parse_objects(manifest: &str) -> Result<ManifestObjects, ManifestError> {
    if manifest.len() > max_manifest_bytes() {
        return Err(ManifestError::TooLarge { max: max_manifest_bytes() });
    }

    let mut docs: Vec<String> = Vec::new();
    let mut cur = String::new();
    for line in manifest.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim_end() == "---" {
            docs.push(std::mem::take(&mut cur));
        } else {
            cur.push_str(line);
            cur.push('\n');
        }
    }
    docs.push(cur);

    let mut objects = ManifestObjects::default();
    for (doc_index, doc) in docs.iter().enumerate() {
        // A document of comments only is valid YAML but carries nothing.
        let has_content = doc.lines().map(str::trim).any(|l| !l.is_empty() && !l.starts_with('#'));
        if !has_content {
            continue;
        }
        let val: serde_yaml::Value = serde_yaml::from_str(doc).map_err(|e| {
            error!(doc_index, error = %e, "error decoding object");
            ManifestError::Parse { doc_index, cause: e.to_string() }
        })?;
        let json = serde_json::to_value(val).map_err(|e| ManifestError::Parse { doc_index, cause: e.to_string() })?;
        let empty = match &json {
            Json::Null => true,
            Json::Object(m) => m.is_empty(),
            _ => false,
        };
        if empty {
            debug!(doc_index, "skipping empty document");
            continue;
        }
        objects.items.push(ManifestObject::from_json_at(json, doc_index)?);
    }
    Ok(objects)
}
