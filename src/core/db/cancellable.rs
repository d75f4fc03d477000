/// Cancellable Query Execution Module
///
/// Runs one query at a time on a connection handle so that the caller keeps
/// control while the statement runs. The connection is moved to a worker
/// thread for the duration of the query; the caller polls for completion with
/// a bounded wait, checking its cancellation token between polls. A
/// cancellation interrupts the running statement and the connection comes
/// back ready for the next query.
///
/// ## States
///
/// `Idle -> Submitted` on submit, `Submitted -> Cancelling` when the token
/// fires or the timeout elapses, back to `Idle` when the worker hands the
/// connection back. If the statement completes before the interrupt lands the
/// completed result is returned, not discarded.

use crate::core::cancel::{CancelReason, CancellationToken};
use crate::core::{Result, SqlcellError};
use rusqlite::{Connection, ErrorCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::connection::{ConnectionHandle, ExecState};
use super::query::{is_connection_failure, run_query, DecodePolicy, QueryResult};

/// SQLite virtual machine instructions between cancellation flag checks
const PROGRESS_OPS: i32 = 1_000;

/// Default wait between readiness checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Options for cancellable execution
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Longest single wait for the worker before the token is checked again
    pub poll_interval: Duration,
    /// Wall-clock limit after which the query is cancelled
    pub timeout: Option<Duration>,
    pub decode_policy: DecodePolicy,
}

impl Default for ExecOptions {
    fn default() -> Self {
        ExecOptions {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
            decode_policy: DecodePolicy::default(),
        }
    }
}

/// What the worker thread sends back: the connection and the query outcome
struct WorkerOutcome {
    conn: Connection,
    result: Result<QueryResult>,
}

/// Submits queries on a connection handle in cancellable mode.
#[derive(Debug, Clone)]
pub struct ExecutionController {
    handle: ConnectionHandle,
    options: ExecOptions,
}

impl ExecutionController {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self::with_options(handle, ExecOptions::default())
    }

    pub fn with_options(handle: ConnectionHandle, options: ExecOptions) -> Self {
        ExecutionController { handle, options }
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn options(&self) -> &ExecOptions {
        &self.options
    }

    /// Sends `sql` to a worker thread and returns immediately.
    ///
    /// # Errors
    ///
    /// `Busy` if a query is already in flight on the handle, `ConnectionLost`
    /// if the handle's connection failed earlier.
    pub fn submit(&self, sql: &str) -> Result<PendingQuery> {
        let conn = self.handle.checkout()?;
        let cancel_flag = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&cancel_flag);
        conn.progress_handler(PROGRESS_OPS, Some(move || flag.load(Ordering::Acquire)));

        let (sender, receiver) = mpsc::channel();
        let types = self.handle.types();
        let policy = self.options.decode_policy;
        let owned_sql = sql.to_string();

        let spawned = thread::Builder::new()
            .name("sqlcell-query".to_string())
            .spawn(move || {
                let result = run_query(&conn, &owned_sql, &types, policy);
                // The receiver may already be gone if the caller panicked
                let _ = sender.send(WorkerOutcome { conn, result });
            });

        let worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                // The connection moved into the closure that failed to start
                self.handle.mark_lost();
                return Err(SqlcellError::ConnectionLost(format!(
                    "failed to start query worker: {}",
                    e
                )));
            }
        };
        debug!(sql = %sql, "query submitted");

        Ok(PendingQuery {
            handle: self.handle.clone(),
            receiver,
            worker: Some(worker),
            cancel_flag,
            dispatched: None,
            started: Instant::now(),
            poll_interval: self.options.poll_interval,
            timeout: self.options.timeout,
            finished: false,
        })
    }

    /// Submits `sql` and waits for it, cancelling when `token` fires.
    pub fn execute(&self, sql: &str, token: &CancellationToken) -> Result<QueryResult> {
        self.submit(sql)?.wait(token)
    }
}

/// A submitted query that has not been collected yet.
///
/// Dropping an unfinished query cancels it and waits for the connection to
/// be handed back.
pub struct PendingQuery {
    handle: ConnectionHandle,
    receiver: mpsc::Receiver<WorkerOutcome>,
    worker: Option<thread::JoinHandle<()>>,
    cancel_flag: Arc<AtomicBool>,
    dispatched: Option<CancelReason>,
    started: Instant,
    poll_interval: Duration,
    timeout: Option<Duration>,
    finished: bool,
}

impl PendingQuery {
    pub fn state(&self) -> ExecState {
        self.handle.state()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether a cancellation request has been sent for this query.
    pub fn is_cancelling(&self) -> bool {
        self.dispatched.is_some()
    }

    /// Requests cancellation of the running statement.
    ///
    /// Only the first call dispatches a request; later calls do nothing.
    pub fn cancel(&mut self, reason: CancelReason) {
        if self.dispatched.is_some() || self.finished {
            return;
        }
        self.dispatched = Some(reason);
        if self.handle.begin_cancel() {
            info!(%reason, elapsed = ?self.elapsed(), "cancelling query");
            self.cancel_flag.store(true, Ordering::Release);
            self.handle.interrupt_handle().interrupt();
        }
    }

    /// Checks once for completion, waiting at most one poll interval.
    ///
    /// Returns `None` while the query is still running. The token and the
    /// timeout are observed before each wait.
    pub fn poll(&mut self, token: &CancellationToken) -> Option<Result<QueryResult>> {
        if self.finished {
            return Some(Err(SqlcellError::Query(
                "query result was already collected".to_string(),
            )));
        }
        if token.is_cancelled() {
            self.cancel(CancelReason::Interrupt);
        }
        if let Some(limit) = self.timeout {
            if self.elapsed() >= limit {
                self.cancel(CancelReason::Timeout(limit));
            }
        }

        match self.receiver.recv_timeout(self.poll_interval) {
            Ok(outcome) => Some(self.finish(outcome)),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                self.finished = true;
                self.join_worker();
                self.handle.mark_lost();
                warn!("query worker terminated without returning the connection");
                Some(Err(SqlcellError::ConnectionLost(
                    "query worker terminated unexpectedly".to_string(),
                )))
            }
        }
    }

    /// Polls until the query completes, is cancelled or fails.
    pub fn wait(mut self, token: &CancellationToken) -> Result<QueryResult> {
        loop {
            if let Some(result) = self.poll(token) {
                return result;
            }
        }
    }

    fn finish(&mut self, outcome: WorkerOutcome) -> Result<QueryResult> {
        self.finished = true;
        self.join_worker();

        let WorkerOutcome { conn, result } = outcome;
        conn.progress_handler(0, None::<fn() -> bool>);

        match result {
            Err(SqlcellError::Database(e)) if is_connection_failure(&e) => {
                drop(conn);
                self.handle.mark_lost();
                warn!(error = %e, "connection lost during query");
                Err(SqlcellError::ConnectionLost(e.to_string()))
            }
            Err(SqlcellError::Database(e)) if is_interrupt(&e) => {
                self.handle.checkin(conn);
                let reason = self.dispatched.unwrap_or(CancelReason::Interrupt);
                info!(%reason, elapsed = ?self.elapsed(), "query cancelled");
                Err(SqlcellError::QueryCancelled(reason))
            }
            other => {
                self.handle.checkin(conn);
                if self.dispatched.is_some() && other.is_ok() {
                    info!("query completed before the cancellation took effect");
                }
                debug!(elapsed = ?self.elapsed(), ok = other.is_ok(), "query finished");
                other
            }
        }
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("query worker panicked");
            }
        }
    }
}

impl Drop for PendingQuery {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.cancel(CancelReason::Interrupt);
        match self.receiver.recv() {
            Ok(outcome) => {
                let _ = self.finish(outcome);
            }
            Err(_) => {
                self.finished = true;
                self.join_worker();
                self.handle.mark_lost();
            }
        }
    }
}

fn is_interrupt(e: &rusqlite::Error) -> bool {
    matches!(e.sqlite_error_code(), Some(ErrorCode::OperationInterrupted))
}
