/// Connection Management Module
///
/// This module provides the connection handle shared between the command
/// layer and the execution controller. The handle owns the SQLite connection,
/// the registry of column type adapters and the execution state machine that
/// guarantees a single in-flight query per connection.

use crate::core::{Result, SqlcellError};
use crate::geometry::{GeometryAdapter, TypeRegistry};
use crate::scope::Scope;
use crate::template::{self, Quote};
use crate::value::Value;
use rusqlite::{Connection, InterruptHandle};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Execution state of a connection handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    /// No query running; the connection is available
    Idle,
    /// A query has been handed to the worker and is running
    Submitted,
    /// A cancellation request has been dispatched for the running query
    Cancelling,
    /// The connection failed and must be reopened
    Lost,
}

impl Default for ExecState {
    fn default() -> Self {
        ExecState::Idle
    }
}

/// Internal connection slot. The connection is `None` while a worker thread
/// owns it and after it was lost.
#[derive(Debug)]
struct Slot {
    connection: Option<Connection>,
    state: ExecState,
}

struct Inner {
    slot: Mutex<Slot>,
    interrupt: InterruptHandle,
    types: Mutex<TypeRegistry>,
    path: Option<String>,
}

/// Shared handle to one database connection.
///
/// Clones refer to the same connection. At most one query runs on it at a
/// time; a second submission while one is in flight fails with
/// [`SqlcellError::Busy`].
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("path", &self.inner.path)
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionHandle {
    /// Opens a SQLite database at the specified path
    ///
    /// # Arguments
    ///
    /// * `db_path` - Path to the SQLite database file, or ":memory:" for in-memory database
    ///
    /// # Returns
    ///
    /// The open handle, with no type adapters registered.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let path = if db_path != ":memory:" {
            Some(db_path.to_string())
        } else {
            None
        };
        Self::from_connection(conn, path)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    /// Wraps an already open connection.
    pub fn from_connection(conn: Connection, path: Option<String>) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        let interrupt = conn.get_interrupt_handle();
        debug!(path = ?path, "connection opened");
        Ok(ConnectionHandle {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot {
                    connection: Some(conn),
                    state: ExecState::Idle,
                }),
                interrupt,
                types: Mutex::new(TypeRegistry::new()),
                path,
            }),
        })
    }

    /// Path of the database file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&str> {
        self.inner.path.as_deref()
    }

    pub fn state(&self) -> ExecState {
        self.lock_slot().map(|s| s.state).unwrap_or(ExecState::Lost)
    }

    pub fn is_idle(&self) -> bool {
        self.state() == ExecState::Idle
    }

    /// Snapshot of the registered column type adapters.
    pub fn types(&self) -> TypeRegistry {
        self.inner
            .types
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// Registers `adapter` for geometry columns and geometry scope values.
    pub fn register_geometry(&self, adapter: Arc<dyn GeometryAdapter>) -> Result<()> {
        debug!(adapter = adapter.name(), "geometry adapter registered");
        self.lock_types()?.register_geometry(adapter);
        Ok(())
    }

    /// Registers `adapter` for one declared column type.
    pub fn register_type(&self, type_name: &str, adapter: Arc<dyn GeometryAdapter>) -> Result<()> {
        self.lock_types()?.register(type_name, adapter);
        Ok(())
    }

    pub fn unregister_geometry(&self) -> Result<()> {
        self.lock_types()?.unregister_geometry();
        Ok(())
    }

    /// Resolves `template` against `scope` using this connection's quoting
    /// and geometry encoder.
    pub fn substitute(&self, template: &str, scope: &Scope) -> Result<String> {
        let encoder = self.types().encoder();
        template::substitute(template, scope, self, encoder.as_ref())
    }

    /// Runs `f` on the idle connection.
    ///
    /// Fails with `Busy` while a query is in flight and with `ConnectionLost`
    /// once the connection has failed.
    pub fn with_connection<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let slot = self.lock_slot()?;
        match (slot.state, slot.connection.as_ref()) {
            (ExecState::Idle, Some(conn)) => f(conn),
            (ExecState::Submitted, _) | (ExecState::Cancelling, _) => Err(SqlcellError::Busy),
            _ => Err(SqlcellError::ConnectionLost(
                "connection is no longer available".to_string(),
            )),
        }
    }

    /// Moves the connection out for a query: Idle -> Submitted.
    pub(crate) fn checkout(&self) -> Result<Connection> {
        let mut slot = self.lock_slot()?;
        match slot.state {
            ExecState::Idle => {}
            ExecState::Submitted | ExecState::Cancelling => return Err(SqlcellError::Busy),
            ExecState::Lost => {
                return Err(SqlcellError::ConnectionLost(
                    "connection is no longer available".to_string(),
                ))
            }
        }
        let conn = slot.connection.take().ok_or_else(|| {
            SqlcellError::ConnectionLost("connection is no longer available".to_string())
        })?;
        slot.state = ExecState::Submitted;
        Ok(conn)
    }

    /// Returns the connection after a query: any state -> Idle.
    pub(crate) fn checkin(&self, conn: Connection) {
        match self.inner.slot.lock() {
            Ok(mut slot) => {
                slot.connection = Some(conn);
                slot.state = ExecState::Idle;
            }
            Err(_) => warn!("connection state poisoned; dropping connection"),
        }
    }

    /// Submitted -> Cancelling. Returns `false` if no transition happened.
    pub(crate) fn begin_cancel(&self) -> bool {
        match self.inner.slot.lock() {
            Ok(mut slot) if slot.state == ExecState::Submitted => {
                slot.state = ExecState::Cancelling;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn mark_lost(&self) {
        if let Ok(mut slot) = self.inner.slot.lock() {
            slot.connection = None;
            slot.state = ExecState::Lost;
        }
    }

    pub(crate) fn interrupt_handle(&self) -> &InterruptHandle {
        &self.inner.interrupt
    }

    fn lock_slot(&self) -> Result<MutexGuard<'_, Slot>> {
        self.inner
            .slot
            .lock()
            .map_err(|_| SqlcellError::ConnectionLost("connection state poisoned".to_string()))
    }

    fn lock_types(&self) -> Result<MutexGuard<'_, TypeRegistry>> {
        self.inner
            .types
            .lock()
            .map_err(|_| SqlcellError::Config("type registry poisoned".to_string()))
    }
}

impl Quote for ConnectionHandle {
    fn quote_literal(&self, value: &Value) -> Result<String> {
        self.with_connection(|conn| conn.quote_literal(value))
    }

    fn quote_identifier(&self, ident: &str) -> Result<String> {
        self.with_connection(|conn| conn.quote_identifier(ident))
    }
}
