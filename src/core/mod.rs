/// Core Module for sqlcell
///
/// This module contains the query-execution core: the connection handle and
/// its cancellable execution controller, result materialisation, cancellation
/// tokens and the shared error type.

pub mod cancel;
pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use cancel::{CancelReason, CancellationToken};
pub use error::{CommandResult, Result, SqlcellError};
