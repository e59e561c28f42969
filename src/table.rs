//! Table snapshots and the store that publishes them.
//!
//! A [`TableSnapshot`] is immutable: every successful reload replaces it
//! wholesale. Reloads are neither queued nor de-duplicated, so concurrent
//! reloads race and the last one to complete is what subscribers see.

use crate::error::TransientError;
use crate::sheets::TableStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Opaque "has the remote table changed" marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ModifiedToken(String);

impl ModifiedToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModifiedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Header plus data rows as last fetched.
///
/// Row 0 of the raw fetch is always the header; `rows()[i]` is remote row `i + 1`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSnapshot {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    modified: Option<ModifiedToken>,
    fetched_at: DateTime<Utc>,
}

impl TableSnapshot {
    /// Split a raw value grid into header and data rows.
    pub fn from_values(mut values: Vec<Vec<String>>, modified: Option<ModifiedToken>) -> Self {
        let header = if values.is_empty() {
            Vec::new()
        } else {
            values.remove(0)
        };
        Self {
            header,
            rows: values,
            modified,
            fetched_at: Utc::now(),
        }
    }

    pub fn with_modified(mut self, modified: Option<ModifiedToken>) -> Self {
        self.modified = modified;
        self
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&[String]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    /// Number of columns, as declared by the header.
    pub fn width(&self) -> usize {
        self.header.len()
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty()
    }

    pub fn modified(&self) -> Option<&ModifiedToken> {
        self.modified.as_ref()
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

/// Owns the current snapshot and replaces it on reload.
pub struct SnapshotStore {
    table: Arc<dyn TableStore>,
    tx: watch::Sender<Option<Arc<TableSnapshot>>>,
    refreshing: AtomicUsize,
    last_refresh: Mutex<Option<DateTime<Utc>>>,
    // Bumped by `clear`; reloads started before a clear are dropped.
    epoch: AtomicU64,
}

struct RefreshingGuard<'a>(&'a AtomicUsize);

impl Drop for RefreshingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SnapshotStore {
    pub fn new(table: Arc<dyn TableStore>) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            table,
            tx,
            refreshing: AtomicUsize::new(0),
            last_refresh: Mutex::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    /// Fetch all rows and publish them, tagged with `observed` when the
    /// caller already knows the modification token.
    pub async fn reload(
        &self,
        observed: Option<ModifiedToken>,
    ) -> Result<Arc<TableSnapshot>, TransientError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        self.refreshing.fetch_add(1, Ordering::SeqCst);
        let _guard = RefreshingGuard(&self.refreshing);

        let snapshot = match self.table.fetch_all_rows().await {
            Ok(snapshot) => Arc::new(snapshot.with_modified(observed)),
            Err(e) => {
                log::error!("Error loading sheet data: {}", e);
                return Err(e);
            }
        };

        if self.epoch.load(Ordering::SeqCst) != epoch {
            log::debug!("Discarding reload that finished after the table was cleared");
            return Ok(snapshot);
        }

        log::debug!(
            "Data refreshed: {} columns, {} rows",
            snapshot.width(),
            snapshot.rows().len()
        );
        self.set_last_refresh(Some(snapshot.fetched_at()));
        self.tx.send_replace(Some(snapshot.clone()));
        Ok(snapshot)
    }

    pub fn current(&self) -> Option<Arc<TableSnapshot>> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<TableSnapshot>>> {
        self.tx.subscribe()
    }

    /// Drop the snapshot (on sign-out). In-flight reloads will not republish.
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.set_last_refresh(None);
        self.tx.send_replace(None);
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst) > 0
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        match self.last_refresh.lock() {
            Ok(at) => *at,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_last_refresh(&self, at: Option<DateTime<Utc>>) {
        match self.last_refresh.lock() {
            Ok(mut guard) => *guard = at,
            Err(poisoned) => *poisoned.into_inner() = at,
        }
    }
}
