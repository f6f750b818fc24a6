use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use kdecl_core::{gvk_key, GroupVersionKind, ObjectKey};
use kdecl_reconcile::{DynamicWatcher, WatchFilter};
use kube::{
    api::Api,
    core::DynamicObject,
    runtime::{
        watcher::{self, Event},
        WatchStreamExt,
    },
};
use metrics::counter;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ApiResolver;

/// Drive a watch until `cancel` fires or the stream ends, calling `on_event` with
/// every object an event carries. Stream errors are logged and retried with backoff.
async fn drive<F>(api: Api<DynamicObject>, cfg: watcher::Config, gvk: String, cancel: CancellationToken, mut on_event: F)
where
    F: FnMut(&DynamicObject),
{
    let stream = watcher::watcher(api, cfg).default_backoff();
    futures::pin_mut!(stream);
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(Event::Applied(o))) | Some(Ok(Event::Deleted(o))) => {
                counter!("watch_events_total", 1u64);
                on_event(&o);
            }
            Some(Ok(Event::Restarted(list))) => {
                debug!(gvk = %gvk, count = list.len(), "watch restart");
                for o in list.iter() {
                    on_event(o);
                }
            }
            Some(Err(e)) => warn!(gvk = %gvk, error = %e, "watch error"),
            None => {
                warn!(gvk = %gvk, "watcher stream ended");
                break;
            }
        }
    }
}

/// Dynamic watch facility: every event on a watched resource enqueues the owning instance.
pub struct KubeWatcher {
    resolver: Arc<ApiResolver>,
    tx: UnboundedSender<ObjectKey>,
    cancel: CancellationToken,
}

impl KubeWatcher {
    pub fn new(resolver: Arc<ApiResolver>, tx: UnboundedSender<ObjectKey>, cancel: CancellationToken) -> Self {
        Self { resolver, tx, cancel }
    }
}

#[async_trait::async_trait]
impl DynamicWatcher for KubeWatcher {
    async fn add(&self, gvk: &GroupVersionKind, filter: &WatchFilter, target: &ObjectKey) -> Result<()> {
        let api = self.resolver.api(gvk, filter.namespace.as_deref()).await?;
        let mut cfg = watcher::Config::default();
        if !filter.label_selector.is_empty() {
            cfg = cfg.labels(&filter.label_selector);
        }
        let key = gvk_key(gvk);
        info!(gvk = %key, ns = ?filter.namespace, selector = %filter.label_selector, target = %target, "watcher started");
        let tx = self.tx.clone();
        let target = target.clone();
        tokio::spawn(drive(api, cfg, key, self.cancel.child_token(), move |_| {
            let _ = tx.send(target.clone());
        }));
        Ok(())
    }
}
