/*!
# Inventory Sheet Editor

A browser-facing inventory editor backed by a Google Sheets spreadsheet, built in Rust.

## Overview

Users sign in with their Google account, see the inventory sheet as a table, and add,
edit or delete rows. Every change is written straight back to the spreadsheet. Changes
made elsewhere (another browser, the Sheets UI) are picked up by polling the file's
modification time.

## Architecture

### Session layer
- **session**: Session gateway over an [`AuthProvider`]; publishes one message per
  sign-in transition
- **oauth**: Google OAuth 2.0 authorization-code flow

### Remote table layer
- **sheets**: Sheets v4 values API and Drive modification time (`SheetsApi`), row-level
  operations on one sheet (`TableStore`)
- **table**: Immutable table snapshots and the store that reloads and publishes them

### Synchronization layer
- **sync**: Polling synchronizer (30 s interval, one deferred 60 s retry after a failed check)
- **mutations**: Add/update/delete, each followed by a reload

### View layer
- **projection**: Visible column subset and merging edits back into full rows
- **editor**: Edit draft, delete confirmation and column toggles
- **inventory**: Add-row form
- **app**: axum routes (requires the `web` feature)

## Data Flow

```text
sign-in ─▶ SessionGateway ─▶ Synchronizer ─▶ TableStore ─▶ SnapshotStore ─▶ editor view
                                                 ▲
user edit ─▶ editor ─▶ MutationCoordinator ──────┘ (write, then reload)
```

## Known Gaps

- Deleting a row clears and rewrites the sheet's data region; it is not atomic.
- Concurrent reloads are not de-duplicated; the last one to finish wins.

## REST API Endpoints

- `/auth/login`, `/auth/callback`, `/auth/logout`, `/auth/retry` - Session handling
- `/api/session` - Sign-in and refresh status
- `/api/table` - Visible columns and projected rows
- `/api/refresh` - Manual reload
- `/api/rows` - Add a row
- `/api/rows/{index}/edit|draft|save|delete` - Row actions
- `/api/edit/cancel`, `/api/delete/confirm`, `/api/delete/cancel` - Pending action control
- `/api/columns/{index}/toggle` - Show or hide a column
*/

pub mod config;
pub mod editor;
pub mod error;
pub mod inventory;
pub mod mutations;
pub mod oauth;
pub mod projection;
pub mod session;
pub mod sheets;
pub mod sync;
pub mod table;

#[cfg(feature = "web")]
pub mod app;

/// Re-export the types most callers need
pub use config::Config;
pub use error::{AuthError, EditorError, TransientError, ValidationError};
pub use session::{AuthProvider, Session, SessionGateway};
pub use sheets::{RemoteTable, SheetsApi, TableStore};
pub use sync::{SyncState, Synchronizer};
pub use table::{ModifiedToken, SnapshotStore, TableSnapshot};
