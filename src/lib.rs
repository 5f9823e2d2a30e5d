//! Runtime coverage aggregation and persistence.
//!
//! covmap is the core of a code-coverage tool: it turns a stream of
//! (address → source line) facts discovered by static analysis, plus a
//! stream of (address, hit count) events observed during execution, into
//! per-line execution counts, and persists those counts across runs in a
//! compact binary database.
//!
//! The hard part is ordering: line discovery, live hits, and the persisted
//! database all arrive asynchronously, especially when code is loaded via
//! shared libraries after execution has begun. The [`reporter::Reporter`]
//! buffers whatever cannot be resolved yet and reconciles it when the
//! missing piece shows up.
//!
//! ```
//! use covmap::config::ReporterConfig;
//! use covmap::reporter::{IncludeAll, Reporter};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut reporter = Reporter::new(&ReporterConfig::new(dir.path()), Box::new(IncludeAll));
//!
//! // The collector may observe a hit before the line source reports the line.
//! reporter.on_address_hit(0x1000, 1);
//! reporter.on_line("main.c", 10, 0x1000);
//!
//! assert_eq!(reporter.line_execution_count("main.c", 10).hits, 1);
//! ```

/// Configuration types
pub mod config;
/// Core data types module
pub mod core;
/// On-disk database codec
pub mod db;
/// Error types
pub mod error;
/// Tracing setup helpers
pub mod logging;
/// The aggregation orchestrator
pub mod reporter;

pub use crate::config::ReporterConfig;
pub use crate::core::line::HitModel;
pub use crate::error::{CovmapError, Result};
pub use crate::reporter::{
    ExecutionSummary, FileFilter, HitListener, IncludeAll, LineExecutionCount, ModuleInfo,
    Reporter,
};
