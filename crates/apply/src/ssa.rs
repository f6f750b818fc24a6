use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use kdecl_core::{gvk_key, GroupVersionKind};
use kdecl_kubehub::ApiResolver;
use kdecl_manifest::parse_objects;
use kdecl_reconcile::Applier;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams};
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Level};

use crate::{diff_summary, strip_server_fields, ApplyFlags};

/// GVK key → (GVK, namespaces it was applied into; `None` for cluster scope).
pub type AppliedTypes = BTreeMap<String, (GroupVersionKind, BTreeSet<Option<String>>)>;

/// Every type and namespace applied under each prune selector during this process's lifetime,
/// so a kind dropped from the manifest is still listed when pruning.
#[derive(Debug, Default)]
pub struct PruneInventory {
    by_selector: Mutex<HashMap<String, AppliedTypes>>,
}

impl PruneInventory {
    /// Merge `applied` into the selector's inventory and return the merged set.
    pub fn record(&self, selector: &str, applied: &AppliedTypes) -> AppliedTypes {
        let mut by_selector = match self.by_selector.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let known = by_selector.entry(selector.to_string()).or_default();
        for (key, (gvk, namespaces)) in applied {
            known.entry(key.clone()).or_insert_with(|| (gvk.clone(), BTreeSet::new())).1.extend(namespaces.iter().cloned());
        }
        known.clone()
    }
}

/// Server-side apply of every object, then deletion of selector-matching objects the
/// manifest no longer contains, across every type applied under that selector so far.
pub struct SsaApplier {
    resolver: Arc<ApiResolver>,
    field_manager: String,
    inventory: PruneInventory,
}

impl SsaApplier {
    pub fn new(resolver: Arc<ApiResolver>) -> Self {
        Self { resolver, field_manager: "kdecl".to_string(), inventory: PruneInventory::default() }
    }

    pub fn with_field_manager(mut self, name: impl Into<String>) -> Self {
        self.field_manager = name.into();
        self
    }

    async fn prune(
        &self,
        cancel: &CancellationToken,
        selector: &str,
        types: &AppliedTypes,
        keep: &HashSet<(String, Option<String>, String)>,
    ) -> Result<usize> {
        let mut deleted = 0;
        for (key, (gvk, namespaces)) in types {
            for ns in namespaces {
                if cancel.is_cancelled() {
                    return Err(anyhow!("apply cancelled"));
                }
                let resolved = self.resolver.resolve(gvk).await?;
                let scope = if resolved.namespaced { ns.as_deref() } else { None };
                let api = kdecl_kubehub::dynamic_api(self.resolver.client().clone(), &resolved, scope);
                let live = api
                    .list(&ListParams::default().labels(selector))
                    .await
                    .with_context(|| format!("listing {key} for prune"))?;
                for obj in live.items {
                    let name = obj.metadata.name.clone().unwrap_or_default();
                    let obj_ns = if resolved.namespaced { obj.metadata.namespace.clone() } else { None };
                    if name.is_empty() || keep.contains(&(key.clone(), obj_ns.clone(), name.clone())) {
                        continue;
                    }
                    if obj.metadata.deletion_timestamp.is_some() {
                        continue;
                    }
                    let api = kdecl_kubehub::dynamic_api(self.resolver.client().clone(), &resolved, obj_ns.as_deref());
                    api.delete(&name, &DeleteParams::background())
                        .await
                        .with_context(|| format!("pruning {key} {name}"))?;
                    info!(gvk = %key, ns = ?obj_ns, name = %name, "pruned");
                    counter!("prune_deleted_total", 1u64);
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }
}

#[async_trait::async_trait]
impl Applier for SsaApplier {
    async fn apply(&self, cancel: &CancellationToken, namespace: Option<&str>, manifest: &str, extra_args: &[String]) -> Result<()> {
        let t0 = Instant::now();
        counter!("apply_attempts", 1u64);
        let flags = ApplyFlags::parse(extra_args)?;
        let objects = parse_objects(manifest)?;

        let mut types = AppliedTypes::new();
        let mut keep = HashSet::new();
        for o in objects.iter() {
            if cancel.is_cancelled() {
                return Err(anyhow!("apply cancelled"));
            }
            let gvk = o.gvk();
            let key = gvk_key(&gvk);
            let resolved = self.resolver.resolve(&gvk).await?;
            let ns = if resolved.namespaced { o.namespace().or(namespace).map(str::to_string) } else { None };
            let api = kdecl_kubehub::dynamic_api(self.resolver.client().clone(), &resolved, ns.as_deref());

            let desired = o.to_value();
            if tracing::enabled!(Level::DEBUG) {
                let live = api.get_opt(o.name()).await.with_context(|| format!("getting {key} {}", o.name()))?;
                let summary = match live {
                    Some(obj) => diff_summary(&strip_server_fields(desired.clone()), &strip_server_fields(serde_json::to_value(&obj)?)),
                    None => diff_summary(&desired, &serde_json::Value::Null),
                };
                debug!(gvk = %key, ns = ?ns, name = %o.name(), adds = summary.adds, updates = summary.updates, removes = summary.removes, "changes");
            }

            let mut pp = PatchParams::apply(&self.field_manager);
            if flags.force {
                pp = pp.force();
            }
            api.patch(o.name(), &pp, &Patch::Apply(&desired)).await.map_err(|e| {
                counter!("apply_err", 1u64);
                anyhow!("server-side apply of {key} {} failed: {e}", o.name())
            })?;
            debug!(gvk = %key, ns = ?ns, name = %o.name(), "applied");

            types.entry(key.clone()).or_insert_with(|| (gvk.clone(), BTreeSet::new())).1.insert(ns.clone());
            keep.insert((key, ns, o.name().to_string()));
        }
        histogram!("apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        counter!("apply_ok", 1u64);

        if let Some(selector) = &flags.prune_selector {
            let known = self.inventory.record(selector, &types);
            let deleted = self.prune(cancel, selector, &known, &keep).await?;
            debug!(deleted, selector = %selector, "prune finished");
        }
        info!(objects = objects.len(), ns = ?namespace, "server-side apply succeeded");
        Ok(())
    }
}
