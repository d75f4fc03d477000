//! Cancellation tokens for in-flight queries.
//!
//! A token is shared between whoever wants to stop a query (the shell's
//! Ctrl+C watcher, a test, another thread) and the execution controller,
//! which checks it between readiness polls.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared flag signalling that the user asked to abort the current query.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Safe to call from any thread, any number of times.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Clears a previous request so the token can guard the next query.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Why a query was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The cancellation token was triggered
    Interrupt,
    /// The configured wall-clock timeout elapsed
    Timeout(Duration),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Interrupt => write!(f, "interrupted by user"),
            CancelReason::Timeout(limit) => write!(f, "timed out after {:?}", limit),
        }
    }
}
