//! Requeue timing: per-key exponential backoff after failures and a periodic resync after success.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use kdecl_core::ObjectKey;

const BASE_DELAY_MS: u64 = 500;

fn env_secs(name: &str, default: u64) -> Duration {
    let secs = std::env::var(name).ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(default);
    Duration::from_secs(secs)
}

fn requeue_max() -> Duration {
    env_secs("KDECL_REQUEUE_MAX_SECS", 300)
}

/// Delay before a successfully reconciled key is looked at again (`KDECL_RESYNC_SECS`, default 600).
pub fn resync_interval() -> Duration {
    env_secs("KDECL_RESYNC_SECS", 600)
}

/// Delay before retry number `failures + 1`: 500ms doubling, capped by `KDECL_REQUEUE_MAX_SECS`.
pub fn backoff(failures: u32) -> Duration {
    let ms = BASE_DELAY_MS.saturating_mul(1u64 << failures.min(32));
    Duration::from_millis(ms).min(requeue_max())
}

/// Consecutive failure counts per key.
#[derive(Debug, Default)]
pub struct FailureBackoff {
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl FailureBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more failure for `key` and return how long to wait before retrying it.
    pub fn record_failure(&self, key: &ObjectKey) -> Duration {
        let mut failures = match self.failures.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let n = failures.entry(key.clone()).or_insert(0);
        let delay = backoff(*n);
        *n = n.saturating_add(1);
        delay
    }

    pub fn clear(&self, key: &ObjectKey) {
        let mut failures = match self.failures.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        failures.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff(0), Duration::from_millis(500));
        assert_eq!(backoff(1), Duration::from_millis(1000));
        assert_eq!(backoff(3), Duration::from_millis(4000));
        assert_eq!(backoff(40), requeue_max());
    }

    #[test]
    fn failures_are_counted_per_key_until_cleared() {
        let b = FailureBackoff::new();
        let dash = ObjectKey::new(Some("tools"), "dash");
        let other = ObjectKey::new(Some("tools"), "other");
        assert_eq!(b.record_failure(&dash), Duration::from_millis(500));
        assert_eq!(b.record_failure(&dash), Duration::from_millis(1000));
        assert_eq!(b.record_failure(&other), Duration::from_millis(500));
        b.clear(&dash);
        assert_eq!(b.record_failure(&dash), Duration::from_millis(500));
    }
}
