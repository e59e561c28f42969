//! Error taxonomy for the inventory editor.
//!
//! Three families, each with a different presentation:
//! - [`AuthError`] blocks the whole view behind an error screen with a retry action.
//! - [`TransientError`] is any remote read/write failure; it becomes a non-blocking notice
//!   and never stops the synchronizer.
//! - [`ValidationError`] is rejected locally before anything reaches the remote store.

use thiserror::Error;

/// Initialization, sign-in and sign-out failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Required configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The provider could not be initialized (discovery documents, credentials).
    #[error("Failed to initialize Google API: {0}")]
    Initialization(String),

    #[error("Failed to sign in: {0}")]
    SignIn(String),

    #[error("Failed to sign out: {0}")]
    SignOut(String),

    #[error("Not signed in")]
    NotSignedIn,
}

impl AuthError {
    /// Message shown on the blocking error screen.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Any failure talking to the remote tabular-data service.
#[derive(Debug, Error)]
pub enum TransientError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("Remote service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    Decode(String),

    /// No access token is available for the request.
    #[error("No active session for remote request")]
    Unauthenticated,

    /// The addressed row no longer exists remotely; a refresh resolves it.
    #[error("Row {index} no longer exists (table has {rows} data rows)")]
    StaleRow { index: usize, rows: usize },
}

/// Local validation failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// An add was attempted with every field empty.
    #[error("At least one field must have a value")]
    EmptyRow,

    #[error("Column {index} is out of range (table has {width} columns)")]
    ColumnOutOfRange { index: usize, width: usize },

    /// Hidden columns cannot be edited until they are shown again.
    #[error("Column {index} is hidden")]
    ColumnHidden { index: usize },

    #[error("No row is being edited")]
    NoActiveEdit,

    /// A save/draft targeted a different row than the one being edited.
    #[error("Row {requested} is not being edited (editing row {editing})")]
    RowMismatch { requested: usize, editing: usize },

    #[error("Row {index} does not exist")]
    RowOutOfRange { index: usize },

    #[error("No delete is awaiting confirmation")]
    NoPendingDelete,
}

/// Umbrella error returned by the editor surface.
#[derive(Debug, Error)]
pub enum EditorError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Transient(#[from] TransientError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl EditorError {
    /// Auth failures block the view; everything else is a notice.
    pub fn is_blocking(&self) -> bool {
        matches!(self, EditorError::Auth(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_are_blocking() {
        let err: EditorError = AuthError::NotSignedIn.into();
        assert!(err.is_blocking());

        let err: EditorError = TransientError::Unauthenticated.into();
        assert!(!err.is_blocking());

        let err: EditorError = ValidationError::EmptyRow.into();
        assert!(!err.is_blocking());
    }

    #[test]
    fn test_messages_are_user_readable() {
        let err = AuthError::Initialization("discovery unreachable".to_string());
        assert_eq!(
            err.message(),
            "Failed to initialize Google API: discovery unreachable"
        );

        let err = TransientError::StaleRow { index: 4, rows: 2 };
        assert_eq!(
            err.to_string(),
            "Row 4 no longer exists (table has 2 data rows)"
        );
    }
}
