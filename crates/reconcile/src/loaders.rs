//! Manifest loaders and the templating raw operation.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use kdecl_core::DeclarativeObject;
use serde::Deserialize;
use serde_json::Value as Json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::collab::ManifestLoader;
use crate::options::RawManifestOperation;

/// Always returns the same text.
#[derive(Debug, Clone)]
pub struct StaticManifestLoader {
    manifest: String,
}

impl StaticManifestLoader {
    pub fn new(manifest: impl Into<String>) -> Self {
        Self { manifest: manifest.into() }
    }
}

#[async_trait::async_trait]
impl ManifestLoader for StaticManifestLoader {
    async fn resolve_manifest(&self, _cancel: &CancellationToken, _instance: &dyn DeclarativeObject) -> anyhow::Result<String> {
        Ok(self.manifest.clone())
    }
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(default)]
    manifests: Vec<ChannelEntry>,
}

#[derive(Debug, Deserialize)]
struct ChannelEntry {
    version: String,
}

/// Versioned packages on disk:
///
/// ```text
/// <base>/<channel>                                  manifests: [{version: 1.2.0}, ...]
/// <base>/packages/<component>/<version>/manifest.yaml
/// ```
///
/// The version comes from the instance's `spec.version`; without one the first
/// entry of the channel file (`spec.channel`, else the configured default) is used.
#[derive(Debug, Clone)]
pub struct DirectoryManifestLoader {
    base: PathBuf,
    component: String,
    channel: String,
}

impl DirectoryManifestLoader {
    pub fn new(base: impl Into<PathBuf>, component: impl Into<String>) -> Self {
        Self { base: base.into(), component: component.into(), channel: "stable".to_string() }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    async fn latest_version(&self, channel: &str) -> anyhow::Result<String> {
        check_segment("channel", channel)?;
        let path = self.base.join(channel);
        let text = tokio::fs::read_to_string(&path).await.with_context(|| format!("reading channel {}", path.display()))?;
        let parsed: Channel = serde_yaml::from_str(&text).with_context(|| format!("parsing channel {}", path.display()))?;
        parsed
            .manifests
            .into_iter()
            .next()
            .map(|m| m.version)
            .ok_or_else(|| anyhow!("channel {} lists no versions", path.display()))
    }
}

fn spec_string(body: &Json, field: &str) -> Option<String> {
    body.get("spec")?.get(field)?.as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

fn check_segment(what: &str, s: &str) -> anyhow::Result<()> {
    if s.is_empty() || s == "." || s == ".." || s.contains('/') || s.contains('\\') {
        bail!("invalid {what} {s:?}");
    }
    Ok(())
}

#[async_trait::async_trait]
impl ManifestLoader for DirectoryManifestLoader {
    async fn resolve_manifest(&self, _cancel: &CancellationToken, instance: &dyn DeclarativeObject) -> anyhow::Result<String> {
        let body = instance.body();
        let version = match spec_string(&body, "version") {
            Some(v) => v,
            None => {
                let channel = spec_string(&body, "channel").unwrap_or_else(|| self.channel.clone());
                self.latest_version(&channel).await?
            }
        };
        check_segment("version", &version)?;
        let path = self.base.join("packages").join(&self.component).join(&version).join("manifest.yaml");
        debug!(path = %path.display(), "loading manifest");
        tokio::fs::read_to_string(&path).await.with_context(|| format!("reading manifest {}", path.display()))
    }
}

/// Renders another loader's output with the instance body as template context.
pub struct TemplatedManifestLoader {
    inner: Arc<dyn ManifestLoader>,
    snippets: BTreeMap<String, String>,
    fail_on_missing: bool,
}

impl TemplatedManifestLoader {
    pub fn new(inner: Arc<dyn ManifestLoader>) -> Self {
        Self { inner, snippets: BTreeMap::new(), fail_on_missing: true }
    }

    pub fn with_snippets(mut self, snippets: BTreeMap<String, String>) -> Self {
        self.snippets = snippets;
        self
    }

    pub fn fail_on_missing(mut self, fail: bool) -> Self {
        self.fail_on_missing = fail;
        self
    }
}

#[async_trait::async_trait]
impl ManifestLoader for TemplatedManifestLoader {
    async fn resolve_manifest(&self, cancel: &CancellationToken, instance: &dyn DeclarativeObject) -> anyhow::Result<String> {
        let raw = self.inner.resolve_manifest(cancel, instance).await?;
        let out = kdecl_transform::render(&raw, instance.body(), &self.snippets, self.fail_on_missing)
            .context("rendering manifest template")?;
        Ok(out)
    }
}

/// Raw operation that renders the manifest text as a template over the instance body.
pub fn render_template_operation(snippets: BTreeMap<String, String>, fail_on_missing: bool) -> RawManifestOperation {
    Arc::new(move |instance, raw| {
        let out = kdecl_transform::render(&raw, instance.body(), &snippets, fail_on_missing)
            .context("rendering manifest template")?;
        Ok(out)
    })
}
