use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

/// Generates row keys that sort in write order.
///
/// A key is the microsecond timestamp, zero padded to 16 digits, followed by
/// `_` and a suffix fixed per generator. Timestamps never repeat within one
/// generator: when the clock has not advanced past the last key, the last
/// value plus one is used instead. The suffix keeps keys from two processes
/// writing to the same partition apart.
#[derive(Debug)]
pub struct RowKeyGenerator {
    last: AtomicI64,
    suffix: String,
}

impl Default for RowKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RowKeyGenerator {
    #[must_use]
    pub fn new() -> Self {
        let mut suffix = Uuid::new_v4().simple().to_string();
        suffix.truncate(8);
        Self::with_suffix(suffix)
    }

    #[must_use]
    pub fn with_suffix(suffix: impl Into<String>) -> Self {
        Self {
            last: AtomicI64::new(0),
            suffix: suffix.into(),
        }
    }

    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn next_key(&self) -> String {
        let now = Utc::now().timestamp_micros();
        let mut last = self.last.load(Ordering::Relaxed);
        let ticks = loop {
            let candidate = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => break candidate,
                Err(actual) => last = actual,
            }
        };
        format!("{ticks:016}_{}", self.suffix)
    }
}
