use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kdecl_core::{gvk_key, label_selector, DeclarativeObject, GroupVersionKind, ObjectKey};
use kdecl_manifest::{default_object_order, parse_objects, ManifestObjects};
use metrics::{counter, histogram};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::collab::{Applier, DynamicWatcher, ManifestLoader, ObjectClient, WatchFilter};
use crate::options::{Defaults, ReconcilerOption, ReconcilerParams, ValidationError};
use crate::ReconcileError;

/// Host runtime handles a reconciler talks to.
#[derive(Clone)]
pub struct Host {
    pub client: Arc<dyn ObjectClient>,
    pub applier: Arc<dyn Applier>,
    /// Without a watcher, changes to applied objects do not retrigger reconciles.
    pub watcher: Option<Arc<dyn DynamicWatcher>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WatchKey {
    gvk: String,
    label_selector: String,
    namespace: Option<String>,
}

/// Reconciler for one custom-resource type. Shared across tasks via `Arc`.
pub struct Reconciler {
    host: Host,
    gvk: GroupVersionKind,
    params: ReconcilerParams,
    loader: Arc<dyn ManifestLoader>,
    watched: Mutex<HashSet<WatchKey>>,
}

impl Reconciler {
    /// Options apply in the order `defaults.begin`, `opts`, `defaults.end`.
    pub fn new(
        host: Host,
        gvk: GroupVersionKind,
        defaults: &Defaults,
        opts: &[ReconcilerOption],
    ) -> Result<Self, ValidationError> {
        let mut params = ReconcilerParams { gvk: Some(gvk.clone()), ..Default::default() };
        for opt in defaults.begin.iter().chain(opts).chain(defaults.end.iter()) {
            opt(&mut params);
        }
        let mut problems = Vec::new();
        if params.manifest_controller.is_none() {
            if let Some(factory) = &defaults.manifest_loader {
                match factory() {
                    Ok(loader) => params.manifest_controller = Some(loader),
                    Err(e) => problems.push(format!("default manifest loader: {e:#}")),
                }
            }
        }
        problems.extend(params.problems());
        let loader = match params.manifest_controller.clone() {
            Some(loader) if problems.is_empty() => loader,
            _ => return Err(ValidationError(problems)),
        };
        debug!(gvk = %gvk_key(&gvk), prune = params.prune, "reconciler configured");
        Ok(Self { host, gvk, params, loader, watched: Mutex::new(HashSet::new()) })
    }

    pub fn gvk(&self) -> &GroupVersionKind {
        &self.gvk
    }

    pub fn params(&self) -> &ReconcilerParams {
        &self.params
    }

    /// One pass for `key`. A missing object is success.
    pub async fn reconcile(&self, key: &ObjectKey, cancel: &CancellationToken) -> Result<(), ReconcileError> {
        let span = info_span!("reconcile", gvk = %gvk_key(&self.gvk), key = %key);
        counter!("reconcile_total", 1u64);
        let result = self.reconcile_key(key, cancel).instrument(span).await;
        if let Err(e) = &result {
            counter!("reconcile_errors_total", 1u64);
            warn!(key = %key, error = %e, transient = e.is_transient(), "reconcile failed");
        }
        result
    }

    async fn reconcile_key(&self, key: &ObjectKey, cancel: &CancellationToken) -> Result<(), ReconcileError> {
        if cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled);
        }
        let Some(instance) = self.host.client.get(&self.gvk, key).await.map_err(ReconcileError::Get)? else {
            debug!("object not found; nothing to do");
            return Ok(());
        };
        let instance = instance.as_ref();
        if let Some(status) = &self.params.status {
            status.preflight(cancel, instance).await.map_err(ReconcileError::Preflight)?;
        }

        let mut objects = self.build(cancel, instance).await?;
        let result = self.reconcile_exists(cancel, key, instance, &mut objects).await;
        if let Some(status) = &self.params.status {
            if let Err(e) = status.reconciled(instance, &objects, result.as_ref().err()).await {
                warn!(error = %e, "status update failed");
            }
        }
        result
    }

    /// Loader, raw operations, parse, object transformations, labels, sort.
    pub async fn build(
        &self,
        cancel: &CancellationToken,
        instance: &dyn DeclarativeObject,
    ) -> Result<ManifestObjects, ReconcileError> {
        let mut raw = tokio::select! {
            _ = cancel.cancelled() => return Err(ReconcileError::Cancelled),
            r = self.loader.resolve_manifest(cancel, instance) => r.map_err(ReconcileError::Load)?,
        };
        for (index, op) in self.params.raw_manifest_operations.iter().enumerate() {
            raw = op(instance, raw).map_err(|cause| ReconcileError::RawOperation { index, cause })?;
        }
        let mut objects = parse_objects(&raw).map_err(ReconcileError::Parse)?;
        for (index, t) in self.params.object_transformations.iter().enumerate() {
            t(instance, &mut objects).map_err(|cause| ReconcileError::Transform { index, cause })?;
        }
        // Last, so earlier transformations cannot drop the selector labels.
        if let Some(label_maker) = &self.params.label_maker {
            let labels = label_maker(instance);
            for o in objects.iter_mut() {
                o.add_labels(&labels).map_err(ReconcileError::Labels)?;
            }
        }
        objects.sort(default_object_order);
        debug!(objects = objects.len(), "manifest built");
        Ok(objects)
    }

    async fn reconcile_exists(
        &self,
        cancel: &CancellationToken,
        key: &ObjectKey,
        instance: &dyn DeclarativeObject,
        objects: &mut ManifestObjects,
    ) -> Result<(), ReconcileError> {
        self.inject_owner_references(instance, objects)?;
        objects.validate().map_err(ReconcileError::Invalid)?;
        let manifest = objects.json_manifest().map_err(ReconcileError::Serialize)?;

        let labels = self.params.label_maker.as_ref().map(|f| f(instance)).unwrap_or_default();
        let selector = label_selector(&labels);
        let mut args = vec!["--force".to_string()];
        if self.params.prune {
            if labels.is_empty() {
                return Err(ReconcileError::EmptyPruneSelector);
            }
            args.extend(["--prune".to_string(), "--selector".to_string(), selector.clone()]);
        }
        let ns = if self.params.preserve_namespace { None } else { key.namespace.as_deref() };

        let t0 = Instant::now();
        tokio::select! {
            _ = cancel.cancelled() => return Err(ReconcileError::Cancelled),
            r = self.host.applier.apply(cancel, ns, &manifest, &args) => r.map_err(ReconcileError::Apply)?,
        }
        histogram!("apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(objects = objects.len(), ns = ?ns, prune = self.params.prune, "manifest applied");

        self.set_watches(instance, objects, &selector, ns).await;

        if let Some(sink) = &self.params.sink {
            sink.notify(instance, objects).await.map_err(ReconcileError::Sink)?;
        }
        Ok(())
    }

    fn inject_owner_references(
        &self,
        instance: &dyn DeclarativeObject,
        objects: &mut ManifestObjects,
    ) -> Result<(), ReconcileError> {
        let Some(owner_fn) = &self.params.owner_fn else { return Ok(()) };
        let siblings: &ManifestObjects = objects;
        let owners: Vec<_> = siblings.iter().map(|o| owner_fn(instance, o, siblings)).collect();
        for (o, owner) in objects.iter_mut().zip(owners) {
            let Some(owner) = owner else { continue };
            let (Some(uid), false) = (owner.uid.as_deref().filter(|u| !u.is_empty()), owner.name.is_empty()) else {
                debug!(object = %o.name(), "owner has no name or uid; skipping owner reference");
                continue;
            };
            let Some(gvk) = owner.gvk.as_ref().filter(|g| !g.kind.is_empty() && !g.version.is_empty()) else {
                debug!(object = %o.name(), owner = %owner.name, "owner type unresolved; skipping owner reference");
                continue;
            };
            if let (Some(owner_ns), Some(ns)) = (owner.namespace.as_deref(), o.namespace()) {
                if owner_ns != ns {
                    warn!(object = %o.name(), ns, owner_ns, "owner reference crosses namespaces");
                }
            }
            let api_version = if gvk.group.is_empty() {
                gvk.version.clone()
            } else {
                format!("{}/{}", gvk.group, gvk.version)
            };
            let reference = OwnerReference {
                api_version,
                kind: gvk.kind.clone(),
                name: owner.name.clone(),
                uid: uid.to_string(),
                controller: Some(true),
                block_owner_deletion: Some(true),
            };
            o.set_owner_references(&[reference]).map_err(ReconcileError::Owner)?;
        }
        Ok(())
    }

    async fn set_watches(
        &self,
        instance: &dyn DeclarativeObject,
        objects: &ManifestObjects,
        selector: &str,
        applied_ns: Option<&str>,
    ) {
        let Some(watcher) = &self.host.watcher else { return };
        let target = instance.key();
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for o in objects.iter() {
            let gvk = o.gvk();
            let key = WatchKey {
                gvk: gvk_key(&gvk),
                label_selector: selector.to_string(),
                namespace: o.namespace().or(applied_ns).map(str::to_string),
            };
            if seen.insert(key.clone()) {
                pending.push((gvk, key));
            }
        }

        let mut watched = self.watched.lock().await;
        for (gvk, key) in pending {
            if watched.contains(&key) {
                continue;
            }
            let filter = WatchFilter { label_selector: key.label_selector.clone(), namespace: key.namespace.clone() };
            match watcher.add(&gvk, &filter, &target).await {
                Ok(()) => {
                    counter!("watch_registrations_total", 1u64);
                    debug!(gvk = %key.gvk, ns = ?key.namespace, selector = %key.label_selector, "watch registered");
                    watched.insert(key);
                }
                // Retried on the next pass.
                Err(e) => warn!(gvk = %key.gvk, ns = ?key.namespace, error = %e, "watch registration failed"),
            }
        }
    }
}
