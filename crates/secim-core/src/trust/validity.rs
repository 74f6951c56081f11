//! Recent positive trust verdicts.

use std::collections::HashMap;

use super::certificate::Serial;

/// How long a positive verdict may be reused (24 hours).
pub const VALIDITY_TTL_SECS: i64 = 24 * 60 * 60;

/// A cached verdict for one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityCacheEntry {
    /// Serial that was validated
    pub serial: Serial,
    /// When validation succeeded (Unix seconds)
    pub verified_at: i64,
}

/// Positive verdicts keyed by certificate id.
///
/// # Invariants
///
/// - An entry is only honoured for the serial it was written for, so a
///   rotated certificate is always re-validated in full.
/// - An entry older than [`VALIDITY_TTL_SECS`] is never honoured.
#[derive(Debug, Default)]
pub struct ValidityCache {
    entries: HashMap<String, ValidityCacheEntry>,
}

impl ValidityCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a usable verdict exists for `id` at `serial`.
    pub fn is_valid(&self, id: &str, serial: &Serial, now: i64) -> bool {
        self.entries
            .get(id)
            .is_some_and(|e| e.serial == *serial && now - e.verified_at < VALIDITY_TTL_SECS)
    }

    /// Record or refresh a verdict.
    pub fn record(&mut self, id: &str, serial: Serial, now: i64) {
        self.entries.insert(id.to_string(), ValidityCacheEntry { serial, verified_at: now });
    }

    /// Drop any verdict for `id`.
    pub fn evict(&mut self, id: &str) -> Option<ValidityCacheEntry> {
        self.entries.remove(id)
    }

    /// Drop every verdict older than the TTL and return the affected ids.
    pub fn purge_expired(&mut self, now: i64) -> Vec<String> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| now - e.verified_at >= VALIDITY_TTL_SECS)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.entries.remove(id);
        }
        expired
    }

    /// Entry for `id`, whether or not it is still usable.
    pub fn get(&self, id: &str) -> Option<&ValidityCacheEntry> {
        self.entries.get(id)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
