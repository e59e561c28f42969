//! Row projection between full backing rows and the visible column subset.
//!
//! Rows coming back from the sheet are sparse: trailing empty cells are
//! omitted. Missing cells read as `""`, and a merge only pads a row when it
//! actually has to write past its end.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Sorted set of visible column indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct VisibleColumns(BTreeSet<usize>);

impl VisibleColumns {
    /// Every header column whose name is not reserved.
    pub fn default_for<S: AsRef<str>>(header: &[String], reserved: &[S]) -> Self {
        Self(
            header
                .iter()
                .enumerate()
                .filter(|(_, name)| !reserved.iter().any(|r| r.as_ref() == name.as_str()))
                .map(|(i, _)| i)
                .collect(),
        )
    }

    pub fn from_indices(indices: impl IntoIterator<Item = usize>) -> Self {
        Self(indices.into_iter().collect())
    }

    /// Show a hidden column or hide a visible one. Returns whether it is now visible.
    pub fn toggle(&mut self, index: usize) -> bool {
        if self.0.remove(&index) {
            false
        } else {
            self.0.insert(index);
            true
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        self.0.contains(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.iter().collect()
    }
}

/// Cell `column` of `row`, empty when the row is shorter.
pub fn cell(row: &[String], column: usize) -> &str {
    row.get(column).map(String::as_str).unwrap_or("")
}

/// The visible cells of `row`, in column order.
pub fn project(row: &[String], visible: &VisibleColumns) -> Vec<String> {
    visible.iter().map(|c| cell(row, c).to_string()).collect()
}

/// Apply `draft` to a copy of `original`.
///
/// Only visible columns are taken from the draft; everything else keeps its
/// original value.
pub fn merge_edit(
    original: &[String],
    draft: &BTreeMap<usize, String>,
    visible: &VisibleColumns,
) -> Vec<String> {
    let mut merged = original.to_vec();
    for (&column, value) in draft {
        if !visible.contains(column) {
            continue;
        }
        if column >= merged.len() {
            if value.is_empty() {
                continue;
            }
            merged.resize(column + 1, String::new());
        }
        merged[column] = value.clone();
    }
    merged
}
