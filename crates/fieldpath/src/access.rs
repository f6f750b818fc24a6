use std::collections::BTreeSet;

use tracing::debug;

use crate::path::{FieldPath, PathElement};
use crate::reflect::{FieldInfo, Reflect, Shape};
use crate::FieldPathError;

/// Assign `value` at every location matching `path` under `root`.
///
/// Empty optional intermediates on the way to a match are allocated (and released
/// again when nothing below them matched). Slice targets split `value` on `,` and
/// append each converted element that is not already present; there is no way to
/// escape a comma, so prefer scalar targets where the value may contain one.
pub fn set_string(root: &mut dyn Reflect, path: &str, value: &str) -> Result<(), FieldPathError> {
    let target: FieldPath = path.parse()?;
    let type_name = root.type_name();
    let mut cur = FieldPath::default();
    let mut found = false;
    Walker { target: &target, op: Op::Set(value) }.visit(root, &mut cur, &mut found)?;
    if !found {
        return Err(FieldPathError::FieldNotFound { path: target.to_string(), type_name });
    }
    debug!(path = %target, "field set");
    Ok(())
}

/// Reset every location matching `path` to its zero value (`None`, empty collection, default).
pub fn unset(root: &mut dyn Reflect, path: &str) -> Result<(), FieldPathError> {
    let target: FieldPath = path.parse()?;
    let type_name = root.type_name();
    let mut cur = FieldPath::default();
    let mut found = false;
    Walker { target: &target, op: Op::Unset }.visit(root, &mut cur, &mut found)?;
    if !found {
        return Err(FieldPathError::FieldNotFound { path: target.to_string(), type_name });
    }
    Ok(())
}

/// The subset of `names` (JSON tags of optional fields) that currently hold a value.
pub fn find_set_fields(record: &dyn Reflect, names: &[&str]) -> Result<BTreeSet<String>, FieldPathError> {
    let record = match record.shape() {
        Shape::Pointer => match record.pointee() {
            Some(inner) => inner,
            None => return Ok(BTreeSet::new()),
        },
        _ => record,
    };
    if record.shape() != Shape::Struct {
        return Err(FieldPathError::NotARecord { type_name: record.type_name() });
    }
    let fields = record.fields();
    let mut set = BTreeSet::new();
    for name in names {
        let Some(index) = fields.iter().position(|f| !f.hidden && (f.json == *name || f.name == *name)) else {
            return Err(FieldPathError::UnknownField { name: name.to_string() });
        };
        let Some(field) = record.field(index) else {
            return Err(FieldPathError::UnknownField { name: name.to_string() });
        };
        if field.shape() != Shape::Pointer {
            return Err(FieldPathError::NotAPointer { field: name.to_string() });
        }
        if field.pointee().is_some() {
            set.insert(name.to_string());
        }
    }
    Ok(set)
}

enum Op<'a> {
    Set(&'a str),
    Unset,
}

struct Walker<'a> {
    target: &'a FieldPath,
    op: Op<'a>,
}

impl Walker<'_> {
    fn visit(&self, v: &mut dyn Reflect, cur: &mut FieldPath, found: &mut bool) -> Result<(), FieldPathError> {
        if !cur.is_empty() && self.target.matches(cur) {
            match self.op {
                Op::Set(value) => assign(v, cur, value)?,
                Op::Unset => v.reset(),
            }
            *found = true;
            return Ok(());
        }
        if !self.target.has_prefix_match(cur) {
            return Ok(());
        }
        match v.shape() {
            Shape::Pointer => {
                let allocated = matches!(self.op, Op::Set(_)) && v.allocate();
                let before = *found;
                if let Some(inner) = v.pointee_mut() {
                    self.visit(inner, cur, found)?;
                }
                if allocated && *found == before {
                    v.reset();
                }
            }
            Shape::Struct => {
                for (i, info) in v.fields().iter().enumerate() {
                    cur.push(PathElement::Field(self.segment_name(info, cur.len()).to_string()));
                    if info.hidden {
                        if self.target.has_prefix_match(cur) {
                            return Err(FieldPathError::ImmutableField { path: cur.to_string() });
                        }
                    } else if let Some(field) = v.field_mut(i) {
                        self.visit(field, cur, found)?;
                    }
                    cur.pop();
                }
            }
            Shape::Slice => {
                for i in 0..v.len() {
                    cur.push(PathElement::ArrayIndex(i));
                    if let Some(elem) = v.element_mut(i) {
                        self.visit(elem, cur, found)?;
                    }
                    cur.pop();
                }
            }
            Shape::Map => {
                let mut keys = v.map_keys();
                // A set that ends on an absent map key creates the entry.
                if let (Op::Set(_), Some(PathElement::MapKey(k))) = (&self.op, self.target.get(cur.len())) {
                    if self.target.len() == cur.len() + 1 && !keys.contains(k) && v.insert_default(k) {
                        keys.push(k.clone());
                    }
                }
                for k in keys {
                    cur.push(PathElement::MapKey(k.clone()));
                    if let Some(entry) = v.entry_mut(&k) {
                        self.visit(entry, cur, found)?;
                    }
                    cur.pop();
                }
            }
            Shape::Scalar => {}
        }
        Ok(())
    }

    /// Paths may name a field by JSON tag or by Rust name; echo whichever the target uses.
    fn segment_name(&self, info: &FieldInfo, depth: usize) -> &'static str {
        match self.target.get(depth) {
            Some(PathElement::Field(n)) if n == info.name => info.name,
            _ => info.json,
        }
    }
}

fn assign(v: &mut dyn Reflect, cur: &FieldPath, value: &str) -> Result<(), FieldPathError> {
    let type_name = v.type_name();
    let conversion = |value: &str| FieldPathError::Conversion {
        path: cur.to_string(),
        type_name,
        value: value.to_string(),
    };
    match v.shape() {
        Shape::Pointer => {
            let allocated = v.allocate();
            let result = match v.pointee_mut() {
                Some(inner) => assign(inner, cur, value),
                None => Err(conversion(value)),
            };
            if allocated && result.is_err() {
                v.reset();
            }
            result
        }
        Shape::Slice => {
            for part in value.split(',') {
                v.append_from_str(part).map_err(|_| conversion(part))?;
            }
            Ok(())
        }
        Shape::Scalar => v.set_from_str(value).map_err(|_| conversion(value)),
        Shape::Struct | Shape::Map => Err(conversion(value)),
    }
}
