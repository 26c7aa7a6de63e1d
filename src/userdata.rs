//! Per-pool user-data store.
//!
//! Lazily created on first `set`; the hash map itself is consumed as an
//! external collaborator (`std::collections::HashMap`), not reimplemented —
//! the interesting part of this module is the cleanup hookup: every entry
//! registers its own cleanup as both plain and child, so user data tied to a
//! pool is torn down whether the pool clears normally or is swept ahead of
//! an exec.

use std::collections::HashMap;

/// Opaque value stored under a user-data key.
///
/// Mirrors the pool's own "caller owns the bytes, pool just tracks a token"
/// convention: the store keeps a `usize` (an address, a handle, whatever the
/// caller's cleanup function knows how to interpret) rather than attempting
/// to own arbitrary `T`.
pub(crate) struct UserDataStore {
    entries: Option<HashMap<String, usize>>,
}

impl UserDataStore {
    pub(crate) fn new() -> Self {
        Self { entries: None }
    }

    /// Inserts or overwrites `key -> data`. Returns `true` if this was a
    /// fresh key (caller should register a cleanup); `false` if an existing
    /// key's value was merely overwritten (the original cleanup still owns
    /// the key's allocation and registration).
    pub(crate) fn set(&mut self, key: &str, data: usize) -> bool {
        let map = self.entries.get_or_insert_with(HashMap::new);
        let is_new = !map.contains_key(key);
        map.insert(key.to_string(), data);
        is_new
    }

    pub(crate) fn get(&self, key: &str) -> Option<usize> {
        self.entries.as_ref()?.get(key).copied()
    }

    pub(crate) fn clear(&mut self) {
        self.entries = None;
    }
}
