use serde_json::{Map, Value};
use tracing::trace;

use crate::TransformError;

type StringFn = Box<dyn Fn(&str, String) -> anyhow::Result<String> + Send + Sync>;
type ObjectFn = Box<dyn Fn(&str, &mut Map<String, Value>) -> anyhow::Result<()> + Send + Sync>;
type SliceFn = Box<dyn Fn(&str, Vec<Value>) -> anyhow::Result<Vec<Value>> + Send + Sync>;

/// Callbacks applied to a JSON tree keyed by value shape.
///
/// Paths are `.`-joined keys (`.spec.template`), with `[]` for every sequence level so
/// one registration covers all elements: `.spec.containers[].image`.
#[derive(Default)]
pub struct Transformer {
    strings: Vec<StringFn>,
    objects: Vec<ObjectFn>,
    slices: Vec<SliceFn>,
}

impl Transformer {
    pub fn new() -> Self {
        Self::default()
    }

    /// String callbacks chain: each receives the previous one's output.
    pub fn add_string_transform<F>(&mut self, f: F)
    where
        F: Fn(&str, String) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.strings.push(Box::new(f));
    }

    pub fn add_object_transform<F>(&mut self, f: F)
    where
        F: Fn(&str, &mut Map<String, Value>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.objects.push(Box::new(f));
    }

    /// Slice callbacks may return a different sequence; elements are visited afterwards.
    pub fn add_slice_transform<F>(&mut self, f: F)
    where
        F: Fn(&str, Vec<Value>) -> anyhow::Result<Vec<Value>> + Send + Sync + 'static,
    {
        self.slices.push(Box::new(f));
    }

    pub fn transform(&self, root: &mut Map<String, Value>) -> Result<(), TransformError> {
        self.visit_object("", root)
    }

    fn visit_object(&self, path: &str, m: &mut Map<String, Value>) -> Result<(), TransformError> {
        for f in &self.objects {
            f(path, m).map_err(|source| TransformError::Callback { path: path.to_string(), source })?;
        }
        for (k, v) in m.iter_mut() {
            let child = format!("{}.{}", path, k);
            self.visit_value(&child, v)?;
        }
        Ok(())
    }

    fn visit_value(&self, path: &str, v: &mut Value) -> Result<(), TransformError> {
        match v {
            Value::Object(m) => self.visit_object(path, m),
            Value::Array(seq) => {
                if !self.slices.is_empty() {
                    let mut current = std::mem::take(seq);
                    for f in &self.slices {
                        current = f(path, current).map_err(|source| TransformError::Callback { path: path.to_string(), source })?;
                    }
                    *seq = current;
                }
                let child = format!("{}[]", path);
                for item in seq.iter_mut() {
                    self.visit_value(&child, item)?;
                }
                Ok(())
            }
            Value::String(s) => {
                if self.strings.is_empty() {
                    return Ok(());
                }
                let mut current = std::mem::take(s);
                for f in &self.strings {
                    current = f(path, current).map_err(|source| TransformError::Callback { path: path.to_string(), source })?;
                }
                trace!(path, "string transformed");
                *s = current;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Order a sequence by the canonical JSON text of each element.
pub fn sort_slice(seq: Vec<Value>) -> Result<Vec<Value>, TransformError> {
    let mut keyed = seq
        .into_iter()
        .map(|v| serde_json::to_string(&v).map(|k| (k, v)))
        .collect::<Result<Vec<_>, _>>()
        .map_err(TransformError::Encode)?;
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(keyed.into_iter().map(|(_, v)| v).collect())
}
