//! Drives a [`Reconciler`] with `kube::runtime::Controller`.
//!
//! The controller watches the reconciled type itself; keys sent by [`KubeWatcher`](crate::KubeWatcher)
//! for applied objects are fed in as extra triggers. Every failed pass is requeued with
//! per-key backoff and every successful one after the resync interval.

use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use kdecl_core::{gvk_key, DeclarativeObject, ObjectKey};
use kdecl_reconcile::{resync_interval, FailureBackoff, ReconcileError, Reconciler};
use kube::{
    core::{ApiResource, DynamicObject},
    runtime::{
        controller::{Action, Controller},
        reflector::ObjectRef,
        watcher,
    },
};
use metrics::counter;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{dynamic_api, ApiResolver};

/// State shared by every reconcile the controller runs.
pub struct Context {
    reconciler: Arc<Reconciler>,
    backoff: FailureBackoff,
    cancel: CancellationToken,
}

impl Context {
    pub fn new(reconciler: Arc<Reconciler>, cancel: CancellationToken) -> Self {
        Self { reconciler, backoff: FailureBackoff::new(), cancel }
    }
}

pub async fn reconcile(obj: Arc<DynamicObject>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let key = obj.key();
    ctx.reconciler.reconcile(&key, &ctx.cancel).await?;
    ctx.backoff.clear(&key);
    Ok(Action::requeue(resync_interval()))
}

pub fn error_policy(obj: Arc<DynamicObject>, error: &ReconcileError, ctx: Arc<Context>) -> Action {
    let key = obj.key();
    let delay = ctx.backoff.record_failure(&key);
    counter!("reconcile_requeues_total", 1u64);
    warn!(key = %key, error = %error, transient = error.is_transient(), delay_ms = delay.as_millis() as u64, "requeue after failure");
    Action::requeue(delay)
}

fn object_ref(resource: &ApiResource, key: &ObjectKey) -> ObjectRef<DynamicObject> {
    let r = ObjectRef::new_with(&key.name, resource.clone());
    match key.namespace.as_deref() {
        Some(ns) => r.within(ns),
        None => r,
    }
}

/// Run the controller for the reconciler's type until `cancel` fires. `namespace` limits the
/// instances watched; `triggers` carries keys from dynamic watches.
pub async fn run_controller(
    resolver: Arc<ApiResolver>,
    reconciler: Arc<Reconciler>,
    namespace: Option<&str>,
    triggers: UnboundedReceiver<ObjectKey>,
    cancel: CancellationToken,
) -> Result<()> {
    let key = gvk_key(reconciler.gvk());
    let resolved = resolver.resolve(reconciler.gvk()).await?;
    let api = dynamic_api(resolver.client().clone(), &resolved, namespace);

    let resource = resolved.resource.clone();
    let triggers = futures::stream::unfold(triggers, |mut rx| async move { rx.recv().await.map(|k| (k, rx)) })
        .map(move |k| object_ref(&resource, &k));

    let ctx = Arc::new(Context::new(reconciler, cancel.clone()));
    let controller = Controller::new_with(api, watcher::Config::default(), resolved.resource.clone())
        .reconcile_on(triggers)
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, action)) => debug!(object = %obj, ?action, "reconciled"),
                Err(e) => debug!(error = %e, "controller event failed"),
            }
        });

    info!(gvk = %key, ns = ?namespace, "controller started");
    tokio::select! {
        _ = cancel.cancelled() => info!(gvk = %key, "controller stopping"),
        _ = controller => warn!(gvk = %key, "controller stream ended"),
    }
    Ok(())
}
