//! The coverage Reporter: event ingestion, resolution, and persistence.
//!
//! The Reporter reconciles three partially-ordered inputs (static line
//! discovery, live execution hits, and the previously persisted database),
//! none of which is guaranteed to arrive before the others. Facts that
//! cannot be resolved yet (a hit before its line is known, a database record
//! for a library that is not loaded) are buffered and resolved exactly once
//! when the missing piece arrives.
//!
//! All mutation goes through `&mut self`: the aggregator is a single-writer
//! component, and callers that spread collection across threads are expected
//! to wrap it in a `Mutex`.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::ReporterConfig;
use crate::core::address_range::{module_id, AddressRange, ModuleTable, RangeIndex, MAIN_BINARY};
use crate::core::line::HitModel;
use crate::core::pending::{DeferredHit, DeferredModuleHits, PendingHits};
use crate::core::source_file::SourceFile;
use crate::db::{self, Record};
use crate::error::Result;

/// Inclusion policy for source files. Excluded files are dropped at
/// discovery time and contribute nothing to queries or the database.
pub trait FileFilter {
    /// True when `path` counts toward coverage.
    fn is_included(&self, path: &str) -> bool;
}

/// A filter that includes every file.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncludeAll;

impl FileFilter for IncludeAll {
    fn is_included(&self, _path: &str) -> bool {
        true
    }
}

/// Observer of live coverage events.
///
/// Called synchronously, inline with hit application, for every live hit
/// that resolves to a known line. Hits replayed from the persisted database
/// do not notify. A blocking listener stalls coverage ingestion.
pub trait HitListener {
    /// One resolved live hit at `addr`.
    fn on_address(&mut self, addr: u64, hits: u64);
}

/// A loaded module (main binary or shared library) and its mapped segments,
/// as reported by the line source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// File system path of the module.
    pub path: String,
    /// Mapped segments in load order. Empty for a module that needs no
    /// address translation (the main binary).
    pub segments: Vec<AddressRange>,
}

impl ModuleInfo {
    /// Describe a module by path and mapped segments.
    pub fn new(path: impl Into<String>, segments: Vec<AddressRange>) -> Self {
        Self {
            path: path.into(),
            segments,
        }
    }
}

/// Execution counts for one line: actual hits and, in single-shot mode, the
/// upper bound (0 means "unbounded").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineExecutionCount {
    /// Recorded hits across the line's addresses.
    pub hits: u64,
    /// Maximum possible hits, or 0 when any number is possible.
    pub possible_hits: u64,
}

/// Aggregate coverage across all included files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionSummary {
    /// Code lines discovered.
    pub total_lines: u64,
    /// Code lines with at least one hit.
    pub executed_lines: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileId(usize);

// Files are never removed from the arena, so a locator stays valid for the
// Reporter's lifetime.
#[derive(Debug, Clone, Copy)]
struct LineLocator {
    file: FileId,
    line: u32,
}

/// The aggregation core. Owns all coverage state for one monitored process.
pub struct Reporter {
    files: Vec<SourceFile>,
    file_index: HashMap<String, FileId>,
    addr_to_line: HashMap<u64, LineLocator>,
    pending_hits: PendingHits,
    deferred: DeferredModuleHits,
    ranges: RangeIndex,
    modules: ModuleTable,
    listeners: Vec<Box<dyn HitListener>>,
    filter: Box<dyn FileFilter>,
    hit_model: HitModel,
    checksum: u64,
    db_path: PathBuf,
    db_loaded: bool,
}

impl Reporter {
    /// Create a Reporter with the given configuration and inclusion filter.
    pub fn new(config: &ReporterConfig, filter: Box<dyn FileFilter>) -> Self {
        Self {
            files: Vec::new(),
            file_index: HashMap::new(),
            addr_to_line: HashMap::new(),
            pending_hits: PendingHits::new(),
            deferred: DeferredModuleHits::new(),
            ranges: RangeIndex::new(),
            modules: ModuleTable::new(),
            listeners: Vec::new(),
            filter,
            hit_model: config.hit_model(),
            checksum: config.checksum,
            db_path: config.db_path(),
            db_loaded: false,
        }
    }

    /// Register an observer for resolved live hits.
    pub fn register_listener(&mut self, listener: Box<dyn HitListener>) {
        self.listeners.push(listener);
    }

    // --- event ingestion -------------------------------------------------

    /// Line discovery: `addr` implements `path:line_nr`.
    ///
    /// Idempotent per (line, address). A hit buffered for `addr` is applied
    /// immediately and removed from the queue.
    pub fn on_line(&mut self, path: &str, line_nr: u32, addr: u64) {
        if !self.filter.is_included(path) {
            return;
        }
        debug!(file = path, line = line_nr, "Line discovered at {:#x}", addr);

        let file_id = self.intern_file(path);
        self.files[file_id.0].add_line(line_nr).add_address(addr);
        self.addr_to_line.insert(
            addr,
            LineLocator {
                file: file_id,
                line: line_nr,
            },
        );

        if let Some(hits) = self.pending_hits.take(addr) {
            self.apply_hit(addr, hits);
        }
    }

    /// Module load: register the module's segments, then reconcile deferred
    /// state belonging to it.
    ///
    /// The first call also loads the persisted database; a missing or
    /// invalid file is treated as no prior data.
    pub fn on_module(&mut self, module: &ModuleInfo) {
        let id = module_id(&module.path);
        debug!(
            module = %module.path,
            segments = module.segments.len(),
            "Module loaded (id {:#x})",
            id
        );

        for &segment in &module.segments {
            self.ranges.insert(segment, id);
            self.modules.record_segment(id, segment);
        }

        if !self.db_loaded {
            self.db_loaded = true;
            match db::load(&self.db_path, self.checksum) {
                Ok(records) => self.replay(records),
                Err(err) => {
                    // Missing or foreign database: start fresh
                    debug!(path = %self.db_path.display(), error = %err, "No prior coverage data");
                }
            }
        }

        for hit in self.deferred.drain(id) {
            let addr = self
                .modules
                .absolute_address(id, hit.segment_index, hit.offset);
            self.enqueue_replayed_hit(addr, hit.hits);
        }
    }

    /// Live coverage event from the collector.
    ///
    /// Hits for addresses with no known line yet are buffered; a later
    /// discovery applies them. Resolved hits are applied and fanned out to
    /// the registered listeners.
    pub fn on_address_hit(&mut self, addr: u64, hits: u64) {
        if !self.addr_to_line.contains_key(&addr) {
            debug!(hits, "Hit before discovery at {:#x}, buffered", addr);
            self.pending_hits.buffer(addr, hits);
            return;
        }

        self.apply_hit(addr, hits);
        for listener in &mut self.listeners {
            listener.on_address(addr, hits);
        }
    }

    // --- queries ---------------------------------------------------------

    /// Filter pass-through: does `path` count toward coverage?
    pub fn file_is_included(&self, path: &str) -> bool {
        self.filter.is_included(path)
    }

    /// True iff a line was ever discovered at `path:line_nr`.
    pub fn line_is_code(&self, path: &str, line_nr: u32) -> bool {
        self.file(path)
            .map(|file| file.line_is_code(line_nr))
            .unwrap_or(false)
    }

    /// Execution counts for `path:line_nr`; zero for unknown files or lines.
    pub fn line_execution_count(&self, path: &str, line_nr: u32) -> LineExecutionCount {
        let line = self.file(path).and_then(|file| file.line(line_nr));
        match line {
            Some(line) => LineExecutionCount {
                hits: line.hits(),
                possible_hits: line.possible_hits(self.hit_model),
            },
            None => LineExecutionCount::default(),
        }
    }

    /// Aggregate counts across all filter-included files that still exist
    /// on disk. Files gone from disk are stale entries from an earlier run
    /// against a since-modified source tree and are skipped.
    pub fn execution_summary(&self) -> ExecutionSummary {
        let mut summary = ExecutionSummary::default();
        for file in &self.files {
            if !Path::new(file.path()).exists() {
                continue;
            }
            if !self.filter.is_included(file.path()) {
                continue;
            }
            summary.total_lines += file.total_lines();
            summary.executed_lines += file.executed_lines();
        }
        summary
    }

    // --- persistence -----------------------------------------------------

    /// Encode every line with at least one recorded hit into the database
    /// format. Encoding unchanged state twice yields identical bytes.
    pub fn marshal(&self) -> Result<Vec<u8>> {
        db::encode(self.checksum, &self.collect_records())
    }

    /// Apply a previously marshalled database image.
    ///
    /// Header validation is all-or-nothing: on mismatch no records are
    /// applied and the error is returned. Records for modules not yet
    /// loaded are deferred; unknown addresses are buffered.
    pub fn unmarshal(&mut self, data: &[u8]) -> Result<()> {
        let records = db::decode(data, self.checksum)?;
        self.replay(records);
        Ok(())
    }

    /// Write the current state to the configured database path.
    pub fn save(&self) -> Result<()> {
        db::store(&self.db_path, self.checksum, &self.collect_records())
    }

    // --- internals -------------------------------------------------------

    fn file(&self, path: &str) -> Option<&SourceFile> {
        self.file_index.get(path).map(|id| &self.files[id.0])
    }

    fn intern_file(&mut self, path: &str) -> FileId {
        if let Some(&id) = self.file_index.get(path) {
            return id;
        }
        let id = FileId(self.files.len());
        self.files.push(SourceFile::new(path));
        self.file_index.insert(path.to_string(), id);
        id
    }

    /// Apply a hit to the line owning `addr`. No-op for unknown addresses.
    fn apply_hit(&mut self, addr: u64, hits: u64) {
        let Some(&locator) = self.addr_to_line.get(&addr) else {
            return;
        };
        debug!(hits, "Hit applied at {:#x}", addr);
        self.files[locator.file.0].register_hit(locator.line, addr, hits, self.hit_model);
    }

    /// Route one replayed (database or deferred-module) hit: apply it when
    /// the line is already known, buffer it otherwise. Replayed counts are
    /// clamped to the line's possible-hit bound in single-shot mode, so
    /// corrupted databases cannot inflate counters.
    fn enqueue_replayed_hit(&mut self, addr: u64, hits: u64) {
        let Some(&locator) = self.addr_to_line.get(&addr) else {
            self.pending_hits.buffer(addr, hits);
            return;
        };

        let hits = match self.hit_model {
            HitModel::SingleShot => {
                let bound = self.files[locator.file.0]
                    .line(locator.line)
                    .map(|line| line.possible_hits(HitModel::SingleShot))
                    .unwrap_or(0);
                hits.min(bound)
            }
            HitModel::Unbounded => hits,
        };
        self.apply_hit(addr, hits);
    }

    /// Feed decoded records through the same resolution path live hits use.
    fn replay(&mut self, records: Vec<Record>) {
        for record in records {
            // Sparse encoding should not produce these, but tolerate them
            if record.hits == 0 {
                continue;
            }

            if record.module != MAIN_BINARY && !self.modules.is_present(record.module) {
                // Typically a shared library that is not loaded yet
                self.deferred.defer(
                    record.module,
                    DeferredHit {
                        offset: record.address,
                        segment_index: record.segment_index,
                        hits: record.hits,
                    },
                );
                continue;
            }

            let addr = if record.module == MAIN_BINARY {
                record.address
            } else {
                self.modules
                    .absolute_address(record.module, record.segment_index, record.address)
            };
            self.enqueue_replayed_hit(addr, record.hits);
        }
    }

    fn collect_records(&self) -> Vec<Record> {
        let mut records = Vec::new();
        for file in &self.files {
            for (_, line) in file.lines() {
                for (addr, hits) in line.addresses() {
                    // No hits? Ignore if so
                    if hits == 0 {
                        continue;
                    }

                    let module = self.ranges.module_of(addr);
                    let (address, segment_index) = if module == MAIN_BINARY {
                        (addr, 0)
                    } else {
                        // For relocated modules, persist only the offset
                        (
                            self.ranges.offset_of(addr),
                            self.modules.segment_index_of(module, addr),
                        )
                    };
                    records.push(Record {
                        address,
                        module,
                        segment_index,
                        hits,
                    });
                }
            }
        }
        records
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter")
            .field("files", &self.files.len())
            .field("addresses", &self.addr_to_line.len())
            .field("pending_hits", &self.pending_hits.len())
            .field("hit_model", &self.hit_model)
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        // Teardown persistence is best-effort; never fatal to the host
        if let Err(err) = self.save() {
            warn!(
                path = %self.db_path.display(),
                error = %err,
                "Failed to persist coverage database"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    struct Recorder(Rc<RefCell<Vec<(u64, u64)>>>);

    impl HitListener for Recorder {
        fn on_address(&mut self, addr: u64, hits: u64) {
            self.0.borrow_mut().push((addr, hits));
        }
    }

    struct ExcludeSuffix(&'static str);

    impl FileFilter for ExcludeSuffix {
        fn is_included(&self, path: &str) -> bool {
            !path.ends_with(self.0)
        }
    }

    fn reporter_in(dir: &TempDir, single_shot: bool) -> Reporter {
        let mut config = ReporterConfig::new(dir.path());
        config.single_shot = single_shot;
        config.checksum = 0x1234;
        Reporter::new(&config, Box::new(IncludeAll))
    }

    #[test]
    fn test_unbounded_line_counts() {
        let dir = TempDir::new().unwrap();
        let mut reporter = reporter_in(&dir, false);

        reporter.on_line("a.c", 10, 0x1000);
        reporter.on_address_hit(0x1000, 5);

        let count = reporter.line_execution_count("a.c", 10);
        assert_eq!(count, LineExecutionCount { hits: 5, possible_hits: 0 });
    }

    #[test]
    fn test_single_shot_line_counts() {
        let dir = TempDir::new().unwrap();
        let mut reporter = reporter_in(&dir, true);

        reporter.on_line("a.c", 10, 0x1000);
        reporter.on_address_hit(0x1000, 5);

        let count = reporter.line_execution_count("a.c", 10);
        assert_eq!(count, LineExecutionCount { hits: 1, possible_hits: 1 });
    }

    #[test]
    fn test_unknown_line_is_zero() {
        let dir = TempDir::new().unwrap();
        let reporter = reporter_in(&dir, false);
        assert_eq!(
            reporter.line_execution_count("nope.c", 1),
            LineExecutionCount::default()
        );
        assert!(!reporter.line_is_code("nope.c", 1));
    }

    #[test]
    fn test_hit_before_discovery_applies_once() {
        let dir = TempDir::new().unwrap();
        let mut reporter = reporter_in(&dir, false);

        reporter.on_address_hit(0x2000, 3);
        reporter.on_address_hit(0x2000, 4);
        reporter.on_line("a.c", 7, 0x2000);

        assert_eq!(reporter.line_execution_count("a.c", 7).hits, 7);

        // Re-discovery must not re-apply the buffered hits
        reporter.on_line("a.c", 7, 0x2000);
        assert_eq!(reporter.line_execution_count("a.c", 7).hits, 7);
    }

    #[test]
    fn test_out_of_order_equivalence() {
        let dir = TempDir::new().unwrap();

        let mut early = reporter_in(&dir, false);
        early.on_line("a.c", 1, 0x1000);
        early.on_address_hit(0x1000, 9);

        let mut late = reporter_in(&dir, false);
        late.on_address_hit(0x1000, 9);
        late.on_line("a.c", 1, 0x1000);

        assert_eq!(
            early.line_execution_count("a.c", 1),
            late.line_execution_count("a.c", 1)
        );
    }

    #[test]
    fn test_filtered_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let mut config = ReporterConfig::new(dir.path());
        config.checksum = 1;
        let mut reporter = Reporter::new(&config, Box::new(ExcludeSuffix("_test.c")));

        reporter.on_line("foo_test.c", 3, 0x1000);
        assert!(!reporter.file_is_included("foo_test.c"));
        assert!(!reporter.line_is_code("foo_test.c", 3));

        // The excluded address stays unknown: hits for it are buffered, not applied
        reporter.on_address_hit(0x1000, 1);
        assert_eq!(reporter.line_execution_count("foo_test.c", 3).hits, 0);
    }

    #[test]
    fn test_listener_fires_on_live_resolved_hits_only() {
        let dir = TempDir::new().unwrap();
        let mut reporter = reporter_in(&dir, false);
        let seen = Rc::new(RefCell::new(Vec::new()));
        reporter.register_listener(Box::new(Recorder(Rc::clone(&seen))));

        // Unresolved: buffered, no notification
        reporter.on_address_hit(0x2000, 1);
        assert!(seen.borrow().is_empty());

        // Resolution of the buffered hit is not a live event either
        reporter.on_line("a.c", 2, 0x2000);
        assert!(seen.borrow().is_empty());

        reporter.on_address_hit(0x2000, 2);
        assert_eq!(*seen.borrow(), vec![(0x2000, 2)]);
    }

    #[test]
    fn test_execution_summary_skips_missing_files() {
        let dir = TempDir::new().unwrap();
        let mut reporter = reporter_in(&dir, false);

        // A source file that exists on disk
        let real = dir.path().join("real.c");
        std::fs::write(&real, "int main() {}\n").unwrap();
        let real = real.to_string_lossy().into_owned();

        reporter.on_line(&real, 1, 0x1000);
        reporter.on_line(&real, 2, 0x1004);
        reporter.on_line("/covmap/definitely/not/here.c", 1, 0x2000);
        reporter.on_address_hit(0x1000, 1);
        reporter.on_address_hit(0x2000, 1);

        let summary = reporter.execution_summary();
        assert_eq!(summary.total_lines, 2);
        assert_eq!(summary.executed_lines, 1);
    }

    #[test]
    fn test_marshal_is_sparse_and_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut reporter = reporter_in(&dir, false);

        reporter.on_line("a.c", 1, 0x1000);
        reporter.on_line("a.c", 2, 0x1004);
        reporter.on_line("a.c", 3, 0x1008);
        reporter.on_address_hit(0x1000, 2);
        reporter.on_address_hit(0x1008, 1);

        let first = reporter.marshal().unwrap();
        // Header plus one record per hit address; zero-hit lines are absent
        assert_eq!(first.len(), db::HEADER_SIZE + 2 * db::RECORD_SIZE);
        assert_eq!(reporter.marshal().unwrap(), first);
    }

    #[test]
    fn test_unmarshal_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut writer = reporter_in(&dir, false);
        writer.on_line("a.c", 1, 0x1000);
        writer.on_address_hit(0x1000, 6);
        let image = writer.marshal().unwrap();

        let mut reader = reporter_in(&dir, false);
        reader.on_line("a.c", 1, 0x1000);
        reader.unmarshal(&image).unwrap();
        assert_eq!(reader.line_execution_count("a.c", 1).hits, 6);
    }

    #[test]
    fn test_unmarshal_checksum_gate() {
        let dir = TempDir::new().unwrap();
        let mut writer = reporter_in(&dir, false);
        writer.on_line("a.c", 1, 0x1000);
        writer.on_address_hit(0x1000, 6);
        let image = writer.marshal().unwrap();

        let mut config = ReporterConfig::new(dir.path());
        config.checksum = 0x9999; // different binary
        let mut reader = Reporter::new(&config, Box::new(IncludeAll));
        reader.on_line("a.c", 1, 0x1000);
        assert!(reader.unmarshal(&image).is_err());
        assert_eq!(reader.line_execution_count("a.c", 1).hits, 0);
    }

    #[test]
    fn test_single_shot_replay_clamps_corrupt_counts() {
        let dir = TempDir::new().unwrap();
        let mut reporter = reporter_in(&dir, true);
        reporter.on_line("a.c", 1, 0x1000);

        let image = db::encode(
            0x1234,
            &[Record {
                address: 0x1000,
                module: 0,
                segment_index: 0,
                hits: u64::MAX,
            }],
        )
        .unwrap();

        reporter.unmarshal(&image).unwrap();
        let count = reporter.line_execution_count("a.c", 1);
        assert_eq!(count.hits, 1);
        assert_eq!(count.possible_hits, 1);
    }

    #[test]
    fn test_zero_hit_records_tolerated() {
        let dir = TempDir::new().unwrap();
        let mut reporter = reporter_in(&dir, false);
        reporter.on_line("a.c", 1, 0x1000);

        let image = db::encode(
            0x1234,
            &[Record {
                address: 0x1000,
                module: 0,
                segment_index: 0,
                hits: 0,
            }],
        )
        .unwrap();

        reporter.unmarshal(&image).unwrap();
        assert_eq!(reporter.line_execution_count("a.c", 1).hits, 0);
    }
}
