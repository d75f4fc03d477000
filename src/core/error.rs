/// sqlcell Error Module
///
/// This module defines the error taxonomy for sqlcell. Substitution and
/// type-adaptation failures are reported where they occur, cancellation is
/// always surfaced to the caller, and a lost connection is kept distinct from
/// a cancelled query so the command layer knows whether it must reconnect.
use crate::core::cancel::CancelReason;
use thiserror::Error;

/// Error type shared by every sqlcell component.
///
/// The variants fall into four groups:
/// - Substitution (`UnresolvedVariable`, `Template`), raised before any I/O
/// - Type adaptation (`GeometryDecode`)
/// - Execution (`QueryCancelled`, `ConnectionLost`, `Busy`, `Database`, `Query`)
/// - Shell plumbing (`NotConnected`, `Config`, `Io`, `Json`, `Command`)
#[derive(Error, Debug)]
pub enum SqlcellError {
    /// Errors reported by SQLite
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Query-level errors that are not driver failures (empty input, bad shape)
    #[error("Query error: {0}")]
    Query(String),

    /// A placeholder names a variable that is not in scope
    #[error("Unresolved variable: '{0}' is not defined in the current scope")]
    UnresolvedVariable(String),

    /// The query template itself is malformed
    #[error("Template error at byte {position}: {message}")]
    Template { position: usize, message: String },

    /// Malformed geometry text in a column value or shell input
    #[error("Geometry decode error: {0}")]
    GeometryDecode(String),

    /// The running statement was stopped on request; the connection is reusable
    #[error("Query cancelled: {0}")]
    QueryCancelled(CancelReason),

    /// The connection can no longer be used and must be reopened
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// A query is already in flight on this connection
    #[error("Connection busy: a query is already running on this connection")]
    Busy,

    /// No database has been opened yet
    #[error("Not connected: open a database first (type ':open <path>')")]
    NotConnected,

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and terminal I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors for shell value literals
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Command validation and execution errors
    #[error("Command error: {0}")]
    Command(String),
}

impl SqlcellError {
    pub(crate) fn template(position: usize, message: impl Into<String>) -> Self {
        SqlcellError::Template {
            position,
            message: message.into(),
        }
    }

    /// Returns `true` when the connection that produced this error can be
    /// used for further queries.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SqlcellError::ConnectionLost(_))
    }

    /// Returns `true` for a user- or timeout-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SqlcellError::QueryCancelled(_))
    }
}

/// Type alias for Result to use SqlcellError as the error type.
pub type Result<T> = std::result::Result<T, SqlcellError>;

/// Type alias for shell command results that may produce a message to print
pub type CommandResult = Result<Option<String>>;
