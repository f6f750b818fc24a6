//! Dotted path expressions: `spec.containers[*].image`, `metadata.labels[app]`.

use std::fmt;
use std::str::FromStr;

use crate::FieldPathError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathElement {
    Field(String),
    MapKey(String),
    ArrayIndex(usize),
    Wildcard,
}

impl PathElement {
    /// Whether `self`, taken from a pattern, accepts `other` at the same position.
    pub fn matches(&self, other: &PathElement) -> bool {
        match (self, other) {
            (PathElement::Wildcard, PathElement::ArrayIndex(_)) => true,
            (a, b) => a == b,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FieldPath {
    elements: Vec<PathElement>,
}

impl FieldPath {
    pub fn new(elements: Vec<PathElement>) -> Self {
        Self { elements }
    }

    pub fn parse(text: &str) -> Result<Self, FieldPathError> {
        text.parse()
    }

    pub fn elements(&self) -> &[PathElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&PathElement> {
        self.elements.get(i)
    }

    pub(crate) fn push(&mut self, e: PathElement) {
        self.elements.push(e);
    }

    pub(crate) fn pop(&mut self) {
        self.elements.pop();
    }

    /// True when every element of `r` is matched by the element of `self` at the same position.
    pub fn has_prefix_match(&self, r: &FieldPath) -> bool {
        r.elements.len() <= self.elements.len()
            && self.elements.iter().zip(&r.elements).all(|(a, b)| a.matches(b))
    }

    pub fn matches(&self, r: &FieldPath) -> bool {
        self.elements.len() == r.elements.len() && self.has_prefix_match(r)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.elements.iter().enumerate() {
            match e {
                PathElement::Field(name) => {
                    if i != 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(name)?;
                }
                PathElement::MapKey(k) => write!(f, "[{}]", k)?,
                PathElement::ArrayIndex(n) => write!(f, "[{}]", n)?,
                PathElement::Wildcard => f.write_str("[*]")?,
            }
        }
        Ok(())
    }
}

fn invalid(path: &str, reason: impl Into<String>) -> FieldPathError {
    FieldPathError::Parse { path: path.to_string(), reason: reason.into() }
}

/// `0` or a digit string without leading zeros; anything else stays a map key so that
/// `Display` reproduces the source text.
fn canonical_index(s: &str) -> Option<usize> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) || (s.len() > 1 && s.starts_with('0')) {
        return None;
    }
    s.parse().ok()
}

impl FromStr for FieldPath {
    type Err = FieldPathError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.is_empty() {
            return Err(invalid(text, "empty path"));
        }
        let mut elements = Vec::new();
        for segment in text.split('.') {
            let (ident, mut rest) = match segment.find('[') {
                Some(i) => segment.split_at(i),
                None => (segment, ""),
            };
            if ident.is_empty() {
                return Err(invalid(text, "empty field name"));
            }
            if ident.contains(']') {
                return Err(invalid(text, format!("unexpected ']' in {:?}", ident)));
            }
            elements.push(PathElement::Field(ident.to_string()));
            while !rest.is_empty() {
                let Some(inner) = rest.strip_prefix('[') else {
                    return Err(invalid(text, format!("expected '[' at {:?}", rest)));
                };
                let Some(close) = inner.find(']') else {
                    return Err(invalid(text, "unterminated '['"));
                };
                let index = &inner[..close];
                if index.is_empty() || index.contains('[') {
                    return Err(invalid(text, format!("bad index {:?}", index)));
                }
                elements.push(match index {
                    "*" => PathElement::Wildcard,
                    s => match canonical_index(s) {
                        Some(n) => PathElement::ArrayIndex(n),
                        None => PathElement::MapKey(s.to_string()),
                    },
                });
                rest = &inner[close + 1..];
            }
        }
        Ok(FieldPath { elements })
    }
}
