//! Mutation coordinator.
//!
//! Add, update and delete each issue one remote write and then reload the
//! snapshot, whether or not the write succeeded. Writes are serialized; reloads
//! are not (they race with poll-triggered reloads like any other). Nothing here
//! retries: a failure goes back to the caller as a notice.

use crate::error::{EditorError, TransientError, ValidationError};
use crate::sheets::TableStore;
use crate::table::SnapshotStore;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct MutationCoordinator {
    table: Arc<dyn TableStore>,
    store: Arc<SnapshotStore>,
    writes: Mutex<()>,
}

impl MutationCoordinator {
    pub fn new(table: Arc<dyn TableStore>, store: Arc<SnapshotStore>) -> Self {
        Self {
            table,
            store,
            writes: Mutex::new(()),
        }
    }

    /// Append a row. Rows where every cell is empty are rejected before any write.
    pub async fn add(&self, row: Vec<String>) -> Result<(), EditorError> {
        if row.iter().all(|cell| cell.is_empty()) {
            return Err(ValidationError::EmptyRow.into());
        }
        let result = {
            let _write = self.writes.lock().await;
            self.table.append_row(row).await
        };
        self.finish("adding row", result).await
    }

    /// Overwrite data row `index` with `row`.
    pub async fn update(&self, index: usize, row: Vec<String>) -> Result<(), EditorError> {
        let result = {
            let _write = self.writes.lock().await;
            self.table.replace_row(index, row).await
        };
        self.finish("updating row", result).await
    }

    /// Remove data row `index`. See [`crate::sheets`] for why this is not atomic.
    pub async fn delete(&self, index: usize) -> Result<(), EditorError> {
        let result = {
            let _write = self.writes.lock().await;
            self.table.delete_row(index).await
        };
        self.finish("deleting row", result).await
    }

    async fn finish(
        &self,
        action: &str,
        written: Result<(), TransientError>,
    ) -> Result<(), EditorError> {
        if let Err(e) = &written {
            log::error!("Error {}: {}", action, e);
        }
        let reloaded = self.store.reload(None).await;
        written?;
        reloaded?;
        Ok(())
    }
}
