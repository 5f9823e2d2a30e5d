//! Deferred-resolution queues for out-of-order coverage facts.
//!
//! Instrumentation frequently observes an address before static discovery
//! catches up, and persisted records can reference shared libraries that are
//! not loaded yet. Both cases are buffered here and resolved exactly once,
//! when the missing piece arrives; entries that never resolve are dropped
//! with the Reporter.

use std::collections::HashMap;

/// Buffered hits for addresses whose line has not been discovered yet.
#[derive(Debug, Clone, Default)]
pub struct PendingHits {
    hits: HashMap<u64, u64>,
}

impl PendingHits {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer `hits` for `addr`, merging with any entry already buffered
    /// for the same address.
    pub fn buffer(&mut self, addr: u64, hits: u64) {
        let entry = self.hits.entry(addr).or_insert(0);
        *entry = entry.saturating_add(hits);
    }

    /// Remove and return the buffered hits for `addr`, if any.
    pub fn take(&mut self, addr: u64) -> Option<u64> {
        self.hits.remove(&addr)
    }

    /// Number of addresses currently buffered.
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// A hit awaiting its module's load. The address is segment-relative until
/// the module's segments are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredHit {
    /// Offset within the segment identified by `segment_index`.
    pub offset: u64,
    /// Position of the segment in the module's registration-order list.
    pub segment_index: u64,
    /// Buffered hit count.
    pub hits: u64,
}

/// Per-module queues of hits whose module has not been loaded yet.
#[derive(Debug, Clone, Default)]
pub struct DeferredModuleHits {
    queues: HashMap<u64, Vec<DeferredHit>>,
}

impl DeferredModuleHits {
    /// Create an empty queue set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a hit under `module`'s identifier.
    pub fn defer(&mut self, module: u64, hit: DeferredHit) {
        self.queues.entry(module).or_default().push(hit);
    }

    /// Remove and return everything queued for `module`, in arrival order.
    pub fn drain(&mut self, module: u64) -> Vec<DeferredHit> {
        self.queues.remove(&module).unwrap_or_default()
    }

    /// True when no module has queued hits.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
