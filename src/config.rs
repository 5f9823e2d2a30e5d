//! Configuration for the coverage aggregator.
//!
//! The database location and execution model are decided once, by whoever
//! constructs the Reporter, and injected from here. Nothing in this crate
//! consults global state for them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::line::HitModel;

/// File name of the coverage database inside the target directory.
pub const DB_FILE_NAME: &str = "coverage.db";

/// Settings for a [`Reporter`](crate::reporter::Reporter).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReporterConfig {
    /// Directory the coverage database is read from and written to.
    pub target_directory: PathBuf,
    /// Whether each instrumented address can be observed at most once per
    /// run (breakpoint-style instrumentation).
    pub single_shot: bool,
    /// Identity of the analyzed binary, as computed by the line source.
    /// Embedded in the database header and validated on load.
    pub checksum: u64,
}

impl ReporterConfig {
    /// Create a configuration for the given target directory.
    pub fn new(target_directory: impl Into<PathBuf>) -> Self {
        Self {
            target_directory: target_directory.into(),
            single_shot: false,
            checksum: 0,
        }
    }

    /// Full path of the coverage database file.
    pub fn db_path(&self) -> PathBuf {
        self.target_directory.join(DB_FILE_NAME)
    }

    /// The execution model implied by this configuration.
    pub fn hit_model(&self) -> HitModel {
        if self.single_shot {
            HitModel::SingleShot
        } else {
            HitModel::Unbounded
        }
    }
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self::new(".")
    }
}
