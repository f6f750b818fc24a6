use std::process::Stdio;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use kdecl_reconcile::Applier;
use metrics::{counter, histogram};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

fn kubectl_path() -> String {
    std::env::var("KDECL_KUBECTL").ok().filter(|s| !s.is_empty()).unwrap_or_else(|| "kubectl".to_string())
}

/// `apply -f - [-n <namespace>] <extra...>`
pub fn kubectl_args(namespace: Option<&str>, extra: &[String]) -> Vec<String> {
    let mut args = vec!["apply".to_string(), "-f".to_string(), "-".to_string()];
    if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
        args.push("-n".to_string());
        args.push(ns.to_string());
    }
    args.extend(extra.iter().cloned());
    args
}

/// Pipes the manifest into `kubectl apply`. The binary is `KDECL_KUBECTL` or `kubectl` on `PATH`.
#[derive(Debug, Clone)]
pub struct KubectlApplier {
    binary: String,
}

impl Default for KubectlApplier {
    fn default() -> Self {
        Self { binary: kubectl_path() }
    }
}

impl KubectlApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

#[async_trait::async_trait]
impl Applier for KubectlApplier {
    async fn apply(&self, cancel: &CancellationToken, namespace: Option<&str>, manifest: &str, extra_args: &[String]) -> Result<()> {
        let t0 = Instant::now();
        counter!("apply_attempts", 1u64);
        let args = kubectl_args(namespace, extra_args);
        debug!(binary = %self.binary, args = ?args, "running kubectl");
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("starting {}", self.binary))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(manifest.as_bytes()).await.context("writing manifest to kubectl")?;
        }
        let output = tokio::select! {
            _ = cancel.cancelled() => bail!("kubectl apply cancelled"),
            out = child.wait_with_output() => out.context("waiting for kubectl")?,
        };
        histogram!("apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            debug!(line, "kubectl");
        }
        if !output.status.success() {
            counter!("apply_err", 1u64);
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("kubectl apply failed ({}): {}", output.status, stderr.trim());
        }
        counter!("apply_ok", 1u64);
        info!(ns = ?namespace, "kubectl apply succeeded");
        Ok(())
    }
}
