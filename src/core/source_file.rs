//! Per-file coverage state: an owning, line-number-indexed container of
//! Lines.
//!
//! Line numbers are 1-based source positions; absent entries mean "not
//! code". Files are created implicitly on first line discovery and live for
//! the Reporter's lifetime.

use serde::{Deserialize, Serialize};

use crate::core::line::{HitModel, Line};

/// Coverage state for one source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    path: String,
    // Sparse, indexed by line number.
    lines: Vec<Option<Line>>,
    total_lines: u64,
    executed_lines: u64,
}

impl SourceFile {
    /// Create an empty file record for `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            lines: Vec::new(),
            total_lines: 0,
            executed_lines: 0,
        }
    }

    /// The source path this record was created for.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The line at `line_nr`, if one was ever discovered there.
    pub fn line(&self, line_nr: u32) -> Option<&Line> {
        self.lines.get(line_nr as usize).and_then(Option::as_ref)
    }

    /// True iff a line was discovered at `line_nr`, independent of hits.
    pub fn line_is_code(&self, line_nr: u32) -> bool {
        self.line(line_nr).is_some()
    }

    /// Find-or-create the line at `line_nr`.
    pub fn add_line(&mut self, line_nr: u32) -> &mut Line {
        let idx = line_nr as usize;
        if idx >= self.lines.len() {
            self.lines.resize_with(idx + 1, || None);
        }
        let slot = &mut self.lines[idx];
        if slot.is_none() {
            self.total_lines += 1;
        }
        slot.get_or_insert_with(Line::new)
    }

    /// Apply a hit to the line at `line_nr`, keeping the executed-line count
    /// current. Quietly ignored when no line exists there.
    pub fn register_hit(&mut self, line_nr: u32, addr: u64, hits: u64, model: HitModel) {
        let Some(slot) = self.lines.get_mut(line_nr as usize) else {
            return;
        };
        let Some(line) = slot.as_mut() else {
            return;
        };

        let was_hit = line.hits() > 0;
        line.register_hit(addr, hits, model);
        if !was_hit && line.hits() > 0 {
            self.executed_lines += 1;
        }
    }

    /// Number of code lines discovered in this file.
    pub fn total_lines(&self) -> u64 {
        self.total_lines
    }

    /// Number of code lines with at least one hit.
    pub fn executed_lines(&self) -> u64 {
        self.executed_lines
    }

    /// All discovered lines with their line numbers, in line-number order.
    pub fn lines(&self) -> impl Iterator<Item = (u32, &Line)> + '_ {
        self.lines
            .iter()
            .enumerate()
            .filter_map(|(nr, slot)| slot.as_ref().map(|line| (nr as u32, line)))
    }
}
