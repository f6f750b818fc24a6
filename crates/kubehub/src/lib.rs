//! Kdecl kubehub: kube client wiring, API resolution, object fetch, watches and the controller loop.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use kdecl_core::{gvk_key, DeclarativeObject, GroupVersionKind, ObjectKey};
use kdecl_reconcile::ObjectClient;
use kube::{
    api::Api,
    core::{ApiResource, DynamicObject},
    discovery::{self, Scope},
    Client,
};
use tokio::sync::RwLock;
use tracing::debug;

mod controller;
mod status;
mod watch;

pub use status::{status_patch, KubeStatus};
pub use controller::{error_policy, reconcile, run_controller, Context};
pub use watch::KubeWatcher;

pub async fn client() -> Result<Client> {
    Client::try_default().await.context("building kube client")
}

/// A served resource and whether it is namespaced.
#[derive(Debug, Clone)]
pub struct ResolvedResource {
    pub resource: ApiResource,
    pub namespaced: bool,
}

/// Caches GVK → API resource lookups for the lifetime of the process.
pub struct ApiResolver {
    client: Client,
    cache: RwLock<HashMap<String, ResolvedResource>>,
}

impl ApiResolver {
    pub fn new(client: Client) -> Self {
        Self { client, cache: RwLock::new(HashMap::new()) }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn resolve(&self, gvk: &GroupVersionKind) -> Result<ResolvedResource> {
        let key = gvk_key(gvk);
        if let Some(hit) = self.cache.read().await.get(&key) {
            return Ok(hit.clone());
        }
        let (resource, caps) = discovery::pinned_kind(&self.client, gvk)
            .await
            .with_context(|| format!("resolving {key}"))?;
        let resolved = ResolvedResource { resource, namespaced: matches!(caps.scope, Scope::Namespaced) };
        debug!(gvk = %key, namespaced = resolved.namespaced, "api resource resolved");
        self.cache.write().await.insert(key, resolved.clone());
        Ok(resolved)
    }

    /// Namespaced API when the resource is namespaced and `namespace` is given, otherwise cluster-wide.
    pub async fn api(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<Api<DynamicObject>> {
        let r = self.resolve(gvk).await?;
        Ok(dynamic_api(self.client.clone(), &r, namespace))
    }
}

pub fn dynamic_api(client: Client, r: &ResolvedResource, namespace: Option<&str>) -> Api<DynamicObject> {
    match namespace {
        Some(ns) if r.namespaced => Api::namespaced_with(client, ns, &r.resource),
        _ => Api::all_with(client, &r.resource),
    }
}

fn strip_managed_fields(obj: &mut DynamicObject) {
    obj.metadata.managed_fields = None;
}

/// Reads custom resources through the dynamic API.
pub struct KubeObjectClient {
    resolver: Arc<ApiResolver>,
}

impl KubeObjectClient {
    pub fn new(resolver: Arc<ApiResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait::async_trait]
impl ObjectClient for KubeObjectClient {
    async fn get(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<Option<Box<dyn DeclarativeObject>>> {
        let api = self.resolver.api(gvk, key.namespace.as_deref()).await?;
        let found = api.get_opt(&key.name).await.with_context(|| format!("getting {} {}", gvk_key(gvk), key))?;
        Ok(found.map(|mut obj| {
            strip_managed_fields(&mut obj);
            Box::new(obj) as Box<dyn DeclarativeObject>
        }))
    }
}
