//! The unit of coverage: one source line and its instrumented addresses.
//!
//! A line of code typically compiles to several instruction addresses, and
//! instrumentation reports hits per address. The Line type keeps the
//! per-address counters and derives line-level hit totals from them.

use serde::{Deserialize, Serialize};

/// Execution model of the instrumentation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HitModel {
    /// Each address contributes at most one hit per run, e.g. when the
    /// collector plants a breakpoint that is removed after it fires.
    /// Per-address counters are capped at 1.
    SingleShot,
    /// Counters accumulate for as long as the process runs.
    Unbounded,
}

/// A source line, represented by the distinct instruction addresses that
/// implement it and a hit counter per address.
///
/// Addresses are unique within a Line, and system-wide a given address
/// belongs to at most one Line (the Reporter's global index enforces the
/// latter).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Line {
    // Small per line; a vector beats a map here.
    addrs: Vec<(u64, u64)>,
}

impl Line {
    /// Create an empty line with no known addresses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instruction address for this line. Idempotent when the
    /// address is already known.
    pub fn add_address(&mut self, addr: u64) {
        if self.addrs.iter().any(|&(a, _)| a == addr) {
            return;
        }
        self.addrs.push((addr, 0));
    }

    /// Apply a hit to one of this line's addresses, registering the address
    /// on the fly if it was not known yet.
    ///
    /// In single-shot mode the counter is forced to 1 regardless of `hits`;
    /// otherwise it accumulates, saturating at `u64::MAX`.
    pub fn register_hit(&mut self, addr: u64, hits: u64, model: HitModel) {
        let idx = match self.addrs.iter().position(|&(a, _)| a == addr) {
            Some(idx) => idx,
            None => {
                self.addrs.push((addr, 0));
                self.addrs.len() - 1
            }
        };

        let counter = &mut self.addrs[idx].1;
        match model {
            HitModel::SingleShot => *counter = 1,
            HitModel::Unbounded => *counter = counter.saturating_add(hits),
        }
    }

    /// Total hits across all of this line's addresses. In single-shot mode
    /// each counter is 0 or 1, so this equals the number of hit addresses.
    pub fn hits(&self) -> u64 {
        self.addrs.iter().map(|&(_, hits)| hits).sum()
    }

    /// Upper bound on [`hits`](Self::hits): the number of distinct addresses
    /// in single-shot mode, or 0 (meaning "unbounded") otherwise.
    pub fn possible_hits(&self, model: HitModel) -> u64 {
        match model {
            HitModel::SingleShot => self.addrs.len() as u64,
            HitModel::Unbounded => 0,
        }
    }

    /// The (address, hit count) pairs of this line, in registration order.
    pub fn addresses(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.addrs.iter().copied()
    }
}
