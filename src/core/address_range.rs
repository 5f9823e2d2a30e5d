//! Address ranges and the loaded-module address index.
//!
//! Shared libraries are relocated at load time, so an absolute address is
//! only meaningful for the current run. The types here classify an absolute
//! address as belonging to the main binary or to a specific module, and
//! convert it to a module-relative (segment index, offset) pair that stays
//! stable across runs regardless of address-space layout randomization.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Module identifier reserved for the main binary. Main-binary addresses are
/// not relocated and need no offset translation.
pub const MAIN_BINARY: u64 = 0;

/// A half-open contiguous memory region `[base, base + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressRange {
    /// The starting address of the range (inclusive)
    pub base: u64,
    /// The size of the range in bytes
    pub size: u64,
}

impl AddressRange {
    /// Create a new AddressRange.
    pub fn new(base: u64, size: u64) -> Self {
        Self { base, size }
    }

    /// The end address of the range (exclusive).
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    /// Check if this range contains the given address.
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end()
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.base, self.end())
    }
}

/// Stable identifier for a loaded module, derived from its file path.
///
/// The identifier is persisted in the coverage database, so it must not
/// depend on toolchain hasher internals; the first eight bytes of the BLAKE3
/// digest of the path are used instead.
pub fn module_id(path: &str) -> u64 {
    let digest = blake3::hash(path.as_bytes());
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&digest.as_bytes()[..8]);
    let id = u64::from_be_bytes(raw);

    // 0 is reserved for the main binary
    if id == MAIN_BINARY {
        1
    } else {
        id
    }
}

#[derive(Debug, Clone, Copy)]
struct RangeEntry {
    size: u64,
    module: u64,
}

/// Ordered index over all registered segment ranges, keyed by base address.
///
/// Answers "which module, if any, contains this address" with a predecessor
/// search: the candidate range is the one with the greatest base not above
/// the address. The index is append-only during a run; modules are never
/// unloaded.
#[derive(Debug, Clone, Default)]
pub struct RangeIndex {
    ranges: BTreeMap<u64, RangeEntry>,
}

impl RangeIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a segment range as belonging to `module`.
    pub fn insert(&mut self, range: AddressRange, module: u64) {
        self.ranges.insert(
            range.base,
            RangeEntry {
                size: range.size,
                module,
            },
        );
    }

    /// True when no ranges have been registered.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Module-relative offset for `addr`, or `addr` unchanged when the index
    /// is empty or no registered range contains the address (a main-binary
    /// address, or a corrupt range).
    pub fn offset_of(&self, addr: u64) -> u64 {
        match self.find(addr) {
            Some((range, _)) => addr - range.base,
            None => addr,
        }
    }

    /// Module identifier of the range containing `addr`, or [`MAIN_BINARY`]
    /// when none does.
    pub fn module_of(&self, addr: u64) -> u64 {
        match self.find(addr) {
            Some((_, module)) => module,
            None => MAIN_BINARY,
        }
    }

    fn find(&self, addr: u64) -> Option<(AddressRange, u64)> {
        let (&base, entry) = self.ranges.range(..=addr).next_back()?;
        let range = AddressRange::new(base, entry.size);
        if !range.contains(addr) {
            return None;
        }
        Some((range, entry.module))
    }
}

/// Per-module segment lists, in registration order.
///
/// A segment's index is its position in the module's list; together with the
/// offset into the segment it forms the hash-stable persisted form of a
/// relocated address.
#[derive(Debug, Clone, Default)]
pub struct ModuleTable {
    segments: HashMap<u64, Vec<AddressRange>>,
}

impl ModuleTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment to `module`'s list.
    pub fn record_segment(&mut self, module: u64, range: AddressRange) {
        self.segments.entry(module).or_default().push(range);
    }

    /// True when at least one segment of `module` has been registered.
    pub fn is_present(&self, module: u64) -> bool {
        self.segments.contains_key(&module)
    }

    /// The segments of `module` in registration order; empty when the module
    /// has not been loaded.
    pub fn segments(&self, module: u64) -> &[AddressRange] {
        self.segments.get(&module).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Index of the segment of `module` containing `addr`.
    ///
    /// Falls back to 0 when no segment matches; every loaded module has at
    /// least one segment, so index 0 is always valid.
    pub fn segment_index_of(&self, module: u64, addr: u64) -> u64 {
        let segments = self.segments(module);
        segments
            .iter()
            .position(|range| range.contains(addr))
            .unwrap_or(0) as u64
    }

    /// Absolute address for a (segment index, offset) pair of `module`.
    ///
    /// An out-of-range segment index leaves the offset untranslated, the
    /// same fallback applied to main-binary records.
    pub fn absolute_address(&self, module: u64, segment_index: u64, offset: u64) -> u64 {
        match self.segments(module).get(segment_index as usize) {
            Some(range) => offset.saturating_add(range.base),
            None => offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_contains() {
        let range = AddressRange::new(0x1000, 0x1000);
        assert!(range.contains(0x1000));
        assert!(range.contains(0x1fff));
        assert!(!range.contains(0x2000));
        assert!(!range.contains(0xfff));
        assert_eq!(range.end(), 0x2000);
    }

    #[test]
    fn test_range_display() {
        let range = AddressRange::new(0x1000, 0x1000);
        assert_eq!(range.to_string(), "[0x1000, 0x2000)");
    }

    #[test]
    fn test_module_id_stable_and_nonzero() {
        let a = module_id("/usr/lib/libc.so.6");
        let b = module_id("/usr/lib/libc.so.6");
        assert_eq!(a, b);
        assert_ne!(a, MAIN_BINARY);
        assert_ne!(a, module_id("/usr/lib/libm.so.6"));
    }

    #[test]
    fn test_empty_index_is_passthrough() {
        let index = RangeIndex::new();
        assert!(index.is_empty());
        assert_eq!(index.offset_of(0x1234), 0x1234);
        assert_eq!(index.module_of(0x1234), MAIN_BINARY);
    }

    #[test]
    fn test_predecessor_search() {
        let mut index = RangeIndex::new();
        index.insert(AddressRange::new(0x1000, 0x1000), 7);
        index.insert(AddressRange::new(0x4000, 0x100), 9);

        assert_eq!(index.module_of(0x1800), 7);
        assert_eq!(index.offset_of(0x1800), 0x800);
        assert_eq!(index.module_of(0x4050), 9);
        assert_eq!(index.offset_of(0x4050), 0x50);

        // Below the first range: predecessor search underflows
        assert_eq!(index.module_of(0x500), MAIN_BINARY);
        assert_eq!(index.offset_of(0x500), 0x500);

        // In the gap past a range's end
        assert_eq!(index.module_of(0x3000), MAIN_BINARY);
        assert_eq!(index.offset_of(0x3000), 0x3000);
    }

    #[test]
    fn test_segment_index_lookup() {
        let mut table = ModuleTable::new();
        let module = module_id("libfoo.so");
        table.record_segment(module, AddressRange::new(0x7f00_0000, 0x1000));
        table.record_segment(module, AddressRange::new(0x7f00_2000, 0x1000));

        assert!(table.is_present(module));
        assert_eq!(table.segment_index_of(module, 0x7f00_0800), 0);
        assert_eq!(table.segment_index_of(module, 0x7f00_2800), 1);
        // No containing segment: defensive fallback to 0
        assert_eq!(table.segment_index_of(module, 0xdead_beef), 0);
    }

    #[test]
    fn test_absolute_address_translation() {
        let mut table = ModuleTable::new();
        let module = module_id("libfoo.so");
        table.record_segment(module, AddressRange::new(0x7f00_0000, 0x1000));
        table.record_segment(module, AddressRange::new(0x7f00_2000, 0x1000));

        assert_eq!(table.absolute_address(module, 1, 0x20), 0x7f00_2020);
        // Out-of-range segment index: offset is used as-is
        assert_eq!(table.absolute_address(module, 5, 0x20), 0x20);
        // Unknown module behaves the same way
        assert_eq!(table.absolute_address(0x42, 0, 0x20), 0x20);
    }
}
