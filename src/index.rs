// Base index: path -> fingerprint mapping built from the base archive.
//
// The index is a trait rather than a concrete map so that very large base
// archives can plug in an external store (an embedded key-value database,
// a scratch file) without touching the delta engine. The engine only ever
// needs get and insert; the index is write-once-per-key during the build
// phase and read-only during the delta pass.

use std::collections::HashMap;

use crate::fingerprint::Fingerprint;

/// Lookup/store contract for base-entry fingerprints, keyed by entry path.
pub trait BaseIndex {
    /// Fingerprint stored for `path`, if any.
    fn get(&self, path: &[u8]) -> Option<Fingerprint>;

    /// Store the fingerprint for `path`, replacing any previous value.
    fn insert(&mut self, path: &[u8], fingerprint: Fingerprint);

    /// Number of distinct paths stored.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory index. One fixed-length digest per base entry; suitable for
/// any base archive whose entry count fits comfortably in memory.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    entries: HashMap<Vec<u8>, Fingerprint>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BaseIndex for MemoryIndex {
    fn get(&self, path: &[u8]) -> Option<Fingerprint> {
        self.entries.get(path).copied()
    }

    fn insert(&mut self, path: &[u8], fingerprint: Fingerprint) {
        self.entries.insert(path.to_vec(), fingerprint);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
