//! Kdecl apply: the `kubectl apply` subprocess tool, a server-side-apply client with
//! label-scoped pruning, and minimal diffs.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

mod kubectl;
mod ssa;

pub use kubectl::{kubectl_args, KubectlApplier};
pub use ssa::SsaApplier;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.adds == 0 && self.updates == 0 && self.removes == 0
    }
}

/// What the apply arguments ask for beyond a plain apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyFlags {
    pub force: bool,
    /// Label selector scoping `--prune`; `None` when pruning is off.
    pub prune_selector: Option<String>,
}

impl ApplyFlags {
    pub fn parse(args: &[String]) -> anyhow::Result<Self> {
        let mut flags = ApplyFlags::default();
        let mut prune = false;
        let mut selector = None;
        let mut it = args.iter();
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--force" => flags.force = true,
                "--prune" => prune = true,
                "--selector" | "-l" => {
                    selector = Some(it.next().ok_or_else(|| anyhow::anyhow!("{arg} needs a value"))?.clone());
                }
                other => match other.strip_prefix("--selector=") {
                    Some(s) => selector = Some(s.to_string()),
                    None => anyhow::bail!("unsupported apply argument {other:?}"),
                },
            }
        }
        if prune {
            match selector {
                Some(s) if !s.is_empty() => flags.prune_selector = Some(s),
                _ => anyhow::bail!("--prune requires a non-empty --selector"),
            }
        }
        Ok(flags)
    }
}

/// Drop fields the server owns so live and desired objects compare cleanly.
pub fn strip_server_fields(mut v: Json) -> Json {
    if let Some(meta) = v.get_mut("metadata").and_then(Json::as_object_mut) {
        for field in ["managedFields", "resourceVersion", "generation", "creationTimestamp", "uid"] {
            meta.remove(field);
        }
    }
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
    }
    v
}

/// Count keys added, values updated and keys removed going from `base` to `target`.
pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    fn walk(a: &Json, b: &Json, s: &mut DiffSummary) {
        match (a, b) {
            (Json::Object(ao), Json::Object(bo)) => {
                for (k, av) in ao {
                    match bo.get(k) {
                        Some(bv) if av == bv => {}
                        Some(bv) => walk(av, bv, s),
                        None => s.adds += 1,
                    }
                }
                s.removes += bo.keys().filter(|k| !ao.contains_key(*k)).count();
            }
            (Json::Array(aa), Json::Array(bb)) => {
                s.updates += aa.iter().zip(bb).filter(|(x, y)| x != y).count();
                s.adds += aa.len().saturating_sub(bb.len());
                s.removes += bb.len().saturating_sub(aa.len());
            }
            (av, bv) => {
                if av != bv {
                    s.updates += 1;
                }
            }
        }
    }
    let mut s = DiffSummary::default();
    walk(target, base, &mut s);
    s
}
