//! Kdecl field paths: parse `a.b[0].c` expressions and assign string values into typed records.
//!
//! Records describe themselves through [`Reflect`]; the engine walks them depth-first,
//! allocating empty optional intermediates on the way to a target and converting the
//! string value to the target's type.

#![forbid(unsafe_code)]

mod access;
mod path;
mod reflect;
mod walk;

pub use access::{find_set_fields, set_string, unset};
pub use path::{FieldPath, PathElement};
pub use reflect::{FieldInfo, Reflect, Shape, Unconvertible};
pub use walk::{reflect_recursive, value_as_string, Walk};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FieldPathError {
    #[error("invalid field path {path:?}: {reason}")]
    Parse { path: String, reason: String },
    #[error("cannot convert {value:?} to {type_name} at {path}")]
    Conversion { path: String, type_name: &'static str, value: String },
    #[error("field {path} cannot be set")]
    ImmutableField { path: String },
    #[error("field {path} not found in {type_name}")]
    FieldNotFound { path: String, type_name: &'static str },
    #[error("field {field} is not a pointer")]
    NotAPointer { field: String },
    #[error("unknown field {name}")]
    UnknownField { name: String },
    #[error("{type_name} is not a record")]
    NotARecord { type_name: &'static str },
}
