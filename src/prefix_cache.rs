//! Content-addressed cache of previously computed KV prefixes.
//!
//! A prefix is fingerprinted by hashing its token sequence with SHA-256; the
//! fingerprint, hex-encoded, doubles as the KV allocator [`crate::kv::Owner`]
//! that holds its blocks. Multiple in-flight requests can share one entry —
//! the entry lives as long as its owner set is non-empty.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::trace;

/// A cached prefix: its token sequence (retained so a caller can verify an
/// exact match rather than trusting the hash alone) and the set of request
/// ids currently depending on it.
#[derive(Debug, Clone)]
pub struct CachedPrefix {
    pub fingerprint: String,
    pub tokens: Vec<u32>,
    pub owners: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrefixCacheStats {
    pub entries: usize,
}

/// Fingerprint a token sequence the way the reference allocator does: hash
/// the comma-joined decimal token ids, not their raw little-endian bytes, so
/// the fingerprint is stable across architectures and easy to eyeball in
/// logs.
pub fn fingerprint(tokens: &[u32]) -> String {
    let joined = tokens
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let digest = Sha256::digest(joined.as_bytes());
    hex::encode(digest)
}

pub struct PrefixCache {
    entries: HashMap<String, CachedPrefix>,
}

impl Default for PrefixCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PrefixCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Fingerprint `tokens`. Pure and side-effect-free — does not touch the
    /// cache at all, just names the prefix a caller would look up.
    pub fn probe(&self, tokens: &[u32]) -> String {
        fingerprint(tokens)
    }

    /// Find the cached prefix (if any) whose token sequence exactly matches
    /// `tokens`. Does not register `owner` as a dependent — call
    /// [`PrefixCache::upsert`] for that.
    pub fn match_prefix(&self, tokens: &[u32]) -> Option<&CachedPrefix> {
        let fp = fingerprint(tokens);
        let entry = self.entries.get(&fp)?;
        if entry.tokens == tokens {
            trace!(fingerprint = %fp, "prefix cache hit");
            Some(entry)
        } else {
            None
        }
    }

    /// Find the cached prefix (if any) whose fingerprint matches `tokens`,
    /// without requiring an exact token match — used when the caller only
    /// has the fingerprint on hand.
    pub fn lookup(&self, fingerprint: &str) -> Option<&CachedPrefix> {
        self.entries.get(fingerprint)
    }

    /// Register `owner` as a dependent of the prefix matching `tokens`,
    /// creating the entry if it doesn't exist yet. Returns the fingerprint.
    pub fn upsert(&mut self, tokens: Vec<u32>, owner: impl Into<String>) -> String {
        let fp = fingerprint(&tokens);
        let owner = owner.into();
        let entry = self.entries.entry(fp.clone()).or_insert_with(|| CachedPrefix {
            fingerprint: fp.clone(),
            tokens,
            owners: Vec::new(),
        });
        if !entry.owners.contains(&owner) {
            entry.owners.push(owner);
        }
        fp
    }

    /// Remove `owner` from the entry's owner set. Once the set is empty the
    /// entry is dropped entirely — the caller is responsible for releasing
    /// the corresponding KV blocks separately.
    pub fn detach(&mut self, fingerprint: &str, owner: &str) {
        let Some(entry) = self.entries.get_mut(fingerprint) else {
            return;
        };
        entry.owners.retain(|o| o != owner);
        if entry.owners.is_empty() {
            self.entries.remove(fingerprint);
        }
    }

    pub fn stats(&self) -> PrefixCacheStats {
        PrefixCacheStats {
            entries: self.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(fingerprint(&[1, 2, 3]), fingerprint(&[1, 2, 3]));
        assert_ne!(fingerprint(&[1, 2, 3]), fingerprint(&[1, 2, 4]));
    }

    #[test]
    fn upsert_then_match_hits() {
        let mut cache = PrefixCache::new();
        cache.upsert(vec![10, 20, 30], "req-A");
        assert!(cache.match_prefix(&[10, 20, 30]).is_some());
    }

    #[test]
    fn match_misses_on_unknown_prefix() {
        let cache = PrefixCache::new();
        assert!(cache.match_prefix(&[1, 2, 3]).is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn probe_is_pure_and_matches_the_fingerprint_function() {
        let cache = PrefixCache::new();
        assert_eq!(cache.probe(&[1, 2, 3]), fingerprint(&[1, 2, 3]));
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn entry_dies_when_owner_set_empties() {
        let mut cache = PrefixCache::new();
        let fp = cache.upsert(vec![7, 8, 9], "req-A");
        cache.upsert(vec![7, 8, 9], "req-B");
        cache.detach(&fp, "req-A");
        assert!(cache.lookup(&fp).is_some());
        cache.detach(&fp, "req-B");
        assert!(cache.lookup(&fp).is_none());
    }

    #[test]
    fn detach_is_noop_for_unknown_fingerprint() {
        let mut cache = PrefixCache::new();
        cache.detach("does-not-exist", "req-A");
        assert_eq!(cache.stats().entries, 0);
    }
}
