//! Per-view editing state: visible columns, the single open edit draft and
//! the delete awaiting confirmation.
//!
//! Row indices are 0-based data rows of the current [`TableSnapshot`].

use crate::error::ValidationError;
use crate::projection::{self, VisibleColumns};
use crate::table::{ModifiedToken, TableSnapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Pending cell values for the one row being edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditDraft {
    pub row: usize,
    pub cells: BTreeMap<usize, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnView {
    pub index: usize,
    pub name: String,
    pub visible: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowView {
    pub index: usize,
    pub cells: Vec<String>,
}

/// What the table view renders.
#[derive(Debug, Clone, Serialize)]
pub struct TableView {
    pub columns: Vec<ColumnView>,
    pub visible_columns: Vec<usize>,
    pub headers: Vec<String>,
    pub rows: Vec<RowView>,
    pub editing: Option<EditDraft>,
    pub pending_delete: Option<usize>,
    pub modified: Option<ModifiedToken>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

#[derive(Debug, Default)]
pub struct EditorState {
    reserved: Vec<String>,
    visible: Option<VisibleColumns>,
    edit: Option<EditDraft>,
    pending_delete: Option<usize>,
}

impl EditorState {
    pub fn new(reserved: Vec<String>) -> Self {
        Self {
            reserved,
            ..Self::default()
        }
    }

    /// Compute the default visible columns the first time a header is seen.
    /// Later reloads keep whatever the user toggled.
    pub fn sync_columns(&mut self, header: &[String]) {
        if self.visible.is_none() && !header.is_empty() {
            let defaults = VisibleColumns::default_for(header, self.reserved.as_slice());
            log::debug!("Default visible columns: {:?}", defaults.to_vec());
            self.visible = Some(defaults);
        }
    }

    pub fn visible(&self) -> Option<&VisibleColumns> {
        self.visible.as_ref()
    }

    pub fn editing(&self) -> Option<&EditDraft> {
        self.edit.as_ref()
    }

    pub fn pending_delete(&self) -> Option<usize> {
        self.pending_delete
    }

    pub fn toggle_column(
        &mut self,
        index: usize,
        snapshot: &TableSnapshot,
    ) -> Result<bool, ValidationError> {
        let width = snapshot.width();
        if index >= width {
            return Err(ValidationError::ColumnOutOfRange { index, width });
        }
        self.sync_columns(snapshot.header());
        let visible = self.visible.get_or_insert_with(VisibleColumns::default);
        Ok(visible.toggle(index))
    }

    /// Open `index` for editing, seeded with its visible cells.
    /// An unsaved draft for another row is dropped.
    pub fn begin_edit(
        &mut self,
        index: usize,
        snapshot: &TableSnapshot,
    ) -> Result<&EditDraft, ValidationError> {
        let row = snapshot
            .row(index)
            .ok_or(ValidationError::RowOutOfRange { index })?;
        self.sync_columns(snapshot.header());

        if let Some(previous) = &self.edit {
            if previous.row != index {
                log::debug!("Abandoning unsaved draft for row {}", previous.row);
            }
        }

        let cells = self
            .visible
            .iter()
            .flat_map(|v| v.iter())
            .map(|c| (c, projection::cell(row, c).to_string()))
            .collect();
        Ok(self.edit.insert(EditDraft { row: index, cells }))
    }

    pub fn set_draft_cell(
        &mut self,
        index: usize,
        column: usize,
        value: String,
        snapshot: &TableSnapshot,
    ) -> Result<(), ValidationError> {
        let width = snapshot.width();
        if column >= width {
            return Err(ValidationError::ColumnOutOfRange {
                index: column,
                width,
            });
        }
        if !self.visible.as_ref().is_some_and(|v| v.contains(column)) {
            return Err(ValidationError::ColumnHidden { index: column });
        }

        let draft = self.edit.as_mut().ok_or(ValidationError::NoActiveEdit)?;
        if draft.row != index {
            return Err(ValidationError::RowMismatch {
                requested: index,
                editing: draft.row,
            });
        }
        draft.cells.insert(column, value);
        Ok(())
    }

    /// Discard the draft. Returns whether there was one.
    pub fn cancel_edit(&mut self) -> bool {
        self.edit.take().is_some()
    }

    /// Close the draft for `index` and merge it into the current row.
    pub fn take_save(
        &mut self,
        index: usize,
        snapshot: &TableSnapshot,
    ) -> Result<Vec<String>, ValidationError> {
        let draft = self.edit.as_ref().ok_or(ValidationError::NoActiveEdit)?;
        if draft.row != index {
            return Err(ValidationError::RowMismatch {
                requested: index,
                editing: draft.row,
            });
        }
        let original = snapshot
            .row(index)
            .ok_or(ValidationError::RowOutOfRange { index })?;

        let empty = VisibleColumns::default();
        let visible = self.visible.as_ref().unwrap_or(&empty);
        let merged = projection::merge_edit(original, &draft.cells, visible);
        self.edit = None;
        Ok(merged)
    }

    pub fn request_delete(
        &mut self,
        index: usize,
        snapshot: &TableSnapshot,
    ) -> Result<(), ValidationError> {
        if snapshot.row(index).is_none() {
            return Err(ValidationError::RowOutOfRange { index });
        }
        self.pending_delete = Some(index);
        Ok(())
    }

    pub fn cancel_delete(&mut self) -> bool {
        self.pending_delete.take().is_some()
    }

    pub fn take_pending_delete(&mut self) -> Result<usize, ValidationError> {
        self.pending_delete
            .take()
            .ok_or(ValidationError::NoPendingDelete)
    }

    /// Forget everything (sign-out).
    pub fn reset(&mut self) {
        self.visible = None;
        self.edit = None;
        self.pending_delete = None;
    }

    pub fn view(&mut self, snapshot: Option<&TableSnapshot>) -> TableView {
        let Some(snapshot) = snapshot.filter(|s| !s.is_empty()) else {
            return TableView {
                columns: Vec::new(),
                visible_columns: Vec::new(),
                headers: Vec::new(),
                rows: Vec::new(),
                editing: None,
                pending_delete: None,
                modified: snapshot.and_then(|s| s.modified().cloned()),
                fetched_at: snapshot.map(TableSnapshot::fetched_at),
                message: Some("No data available".to_string()),
            };
        };

        self.sync_columns(snapshot.header());
        let empty = VisibleColumns::default();
        let visible = self.visible.as_ref().unwrap_or(&empty);

        TableView {
            columns: snapshot
                .header()
                .iter()
                .enumerate()
                .map(|(index, name)| ColumnView {
                    index,
                    name: name.clone(),
                    visible: visible.contains(index),
                })
                .collect(),
            visible_columns: visible.to_vec(),
            headers: projection::project(snapshot.header(), visible),
            rows: snapshot
                .rows()
                .iter()
                .enumerate()
                .map(|(index, row)| RowView {
                    index,
                    cells: projection::project(row, visible),
                })
                .collect(),
            editing: self.edit.clone(),
            pending_delete: self.pending_delete,
            modified: snapshot.modified().cloned(),
            fetched_at: Some(snapshot.fetched_at()),
            message: None,
        }
    }
}
