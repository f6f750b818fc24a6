use std::fmt;
use std::str::FromStr;

use crate::ManifestError;

/// Node taint in the `key[=value][:effect]` notation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Taint {
    pub key: String,
    pub value: String,
    pub effect: String,
}

impl FromStr for Taint {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let (kv, effect) = match parts.as_slice() {
            [kv] => (*kv, ""),
            [kv, effect] => (*kv, *effect),
            _ => return Err(ManifestError::InvalidTaint(s.to_string())),
        };
        let kv_parts: Vec<&str> = kv.split('=').collect();
        let (key, value) = match kv_parts.as_slice() {
            [key] => (*key, ""),
            [key, value] => (*key, *value),
            _ => return Err(ManifestError::InvalidTaint(s.to_string())),
        };
        Ok(Taint { key: key.to_string(), value: value.to_string(), effect: effect.to_string() })
    }
}

impl fmt::Display for Taint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)?;
        if !self.value.is_empty() {
            write!(f, "={}", self.value)?;
        }
        if !self.effect.is_empty() {
            write!(f, ":{}", self.effect)?;
        }
        Ok(())
    }
}
