/// Query Execution Module
///
/// This module runs a resolved query on a connection and materialises the
/// rows as session values, passing every cell of a column with a registered
/// declared type through that type's adapter.

use crate::core::{Result, SqlcellError};
use crate::geometry::{GeometryAdapter, TypeRegistry};
use crate::value::Value;
use rusqlite::{types::ValueRef, Connection, ErrorCode};
use serde::Deserialize;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::sync::Arc;
use tracing::{debug, warn};

use super::connection::ConnectionHandle;

/// What to do when a geometry cell cannot be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodePolicy {
    /// Keep the raw text in the cell and record the failure in the result
    #[default]
    Collect,
    /// Abort the query with the decode error
    FailFast,
}

/// Result column metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    /// Declared type from the table definition, `None` for expressions
    pub decl_type: Option<String>,
    /// Whether an adapter decoded this column's values
    pub adapted: bool,
}

/// A cell whose value could not be decoded by its column's adapter
#[derive(Debug, Clone, PartialEq)]
pub struct CellError {
    pub row: usize,
    pub column: usize,
    pub message: String,
}

/// Represents the result of a SQL query execution
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Column metadata from the query result
    pub columns: Vec<Column>,
    /// Rows of decoded values
    pub rows: Vec<Vec<Value>>,
    /// Number of rows returned
    pub row_count: usize,
    /// Rows changed by a statement without result columns
    pub changes: usize,
    /// Cells left undecoded under `DecodePolicy::Collect`
    pub decode_errors: Vec<CellError>,
    pub statement_type: StatementType,
}

impl QueryResult {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Whether the statement produces result columns (as opposed to DDL/DML).
    pub fn returns_rows(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn first_row(&self) -> Option<&[Value]> {
        self.rows.first().map(Vec::as_slice)
    }

    /// All rows as a list of row lists.
    pub fn to_value(&self) -> Value {
        Value::List(self.rows.iter().map(|r| Value::List(r.clone())).collect())
    }

    /// The first row; a single-column row collapses to its only value.
    /// `Null` when there are no rows.
    pub fn first_row_value(&self) -> Value {
        match self.first_row() {
            None => Value::Null,
            Some([only]) => only.clone(),
            Some(row) => Value::List(row.to_vec()),
        }
    }

    /// The values of column `index` across all rows.
    pub fn column_values(&self, index: usize) -> Option<Value> {
        if index >= self.columns.len() {
            return None;
        }
        Some(Value::List(
            self.rows
                .iter()
                .map(|r| r.get(index).cloned().unwrap_or(Value::Null))
                .collect(),
        ))
    }
}

/// Runs `sql` on `conn`, decoding adapted columns through `types`.
///
/// Driver errors are returned as `SqlcellError::Database` so callers can
/// inspect the SQLite error code.
pub fn run_query(conn: &Connection, sql: &str, types: &TypeRegistry, policy: DecodePolicy) -> Result<QueryResult> {
    let statement_type = StatementType::from_sql(sql);
    if sql.trim().is_empty() {
        return Err(SqlcellError::Query(
            "Cannot execute empty SQL query - please provide a valid SQL statement".to_string(),
        ));
    }

    let mut stmt = conn.prepare(sql)?;
    let adapters: Vec<Option<Arc<dyn GeometryAdapter>>> = stmt
        .columns()
        .iter()
        .map(|c| c.decl_type().and_then(|t| types.lookup(t)).cloned())
        .collect();
    let columns: Vec<Column> = stmt
        .columns()
        .iter()
        .zip(&adapters)
        .map(|(c, adapter)| Column {
            name: c.name().to_string(),
            decl_type: c.decl_type().map(str::to_string),
            adapted: adapter.is_some(),
        })
        .collect();

    if columns.is_empty() {
        let changes = stmt.execute([])?;
        debug!(changes, "statement executed");
        return Ok(QueryResult {
            columns,
            rows: Vec::new(),
            row_count: 0,
            changes,
            decode_errors: Vec::new(),
            statement_type,
        });
    }

    let mut rows = Vec::new();
    let mut decode_errors = Vec::new();
    let mut cursor = stmt.query([])?;
    while let Some(row) = cursor.next()? {
        let row_index = rows.len();
        let mut values = Vec::with_capacity(columns.len());
        for (i, adapter) in adapters.iter().enumerate() {
            let cell = row.get_ref(i)?;
            let value = match (adapter, cell) {
                (Some(adapter), cell) if !matches!(cell, ValueRef::Null) => {
                    let decoded = match cell {
                        ValueRef::Text(raw) => {
                            adapter.decode(&String::from_utf8_lossy(raw)).map_err(|e| match e {
                                SqlcellError::GeometryDecode(reason) => reason,
                                other => other.to_string(),
                            })
                        }
                        other => Err(format!(
                            "expected geometry text, found {}",
                            other.data_type()
                        )),
                    };
                    match decoded {
                        Ok(geometry) => Value::Geometry(geometry),
                        Err(reason) => {
                            let message = format!(
                                "row {}, column '{}': {}",
                                row_index, columns[i].name, reason
                            );
                            if policy == DecodePolicy::FailFast {
                                return Err(SqlcellError::GeometryDecode(message));
                            }
                            warn!("{}", message);
                            decode_errors.push(CellError {
                                row: row_index,
                                column: i,
                                message,
                            });
                            // the raw cell is kept as-is
                            Value::from_value_ref(cell)
                        }
                    }
                }
                (_, cell) => Value::from_value_ref(cell),
            };
            values.push(value);
        }
        rows.push(values);
    }

    let row_count = rows.len();
    debug!(row_count, errors = decode_errors.len(), "query returned rows");
    Ok(QueryResult {
        columns,
        rows,
        row_count,
        changes: 0,
        decode_errors,
        statement_type,
    })
}

/// Runs `sql` on the handle's connection in the calling thread, without
/// cancellation support.
pub fn execute_blocking(handle: &ConnectionHandle, sql: &str, policy: DecodePolicy) -> Result<QueryResult> {
    let types = handle.types();
    match handle.with_connection(|conn| run_query(conn, sql, &types, policy)) {
        Err(SqlcellError::Database(e)) if is_connection_failure(&e) => {
            handle.mark_lost();
            warn!(error = %e, "connection lost during query");
            Err(SqlcellError::ConnectionLost(e.to_string()))
        }
        other => other,
    }
}

/// Errors after which the connection cannot be trusted any more.
pub(crate) fn is_connection_failure(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::SystemIoFailure)
            | Some(ErrorCode::DatabaseCorrupt)
            | Some(ErrorCode::NotADatabase)
            | Some(ErrorCode::CannotOpen)
    )
}

/// Represents different SQL statement types for introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementType {
    /// SELECT statement (including WITH ... SELECT)
    Select,
    /// INSERT statement
    Insert,
    /// UPDATE statement
    Update,
    /// DELETE statement
    Delete,
    /// CREATE statement
    Create,
    /// DROP statement
    Drop,
    /// ALTER statement
    Alter,
    /// BEGIN/COMMIT/ROLLBACK transaction commands
    Transaction,
    /// Other statement types
    Other,
}

impl StatementType {
    /// Classifies a statement by its first keyword, skipping whitespace and
    /// comments.
    pub fn from_sql(sql: &str) -> Self {
        let dialect = SQLiteDialect {};
        let first_word = Tokenizer::new(&dialect, sql)
            .tokenize()
            .ok()
            .and_then(|tokens| {
                tokens.into_iter().find_map(|t| match t {
                    Token::Whitespace(_) => None,
                    Token::Word(w) => Some(Some(w.value.to_uppercase())),
                    _ => Some(None),
                })
            })
            .flatten();

        match first_word.as_deref() {
            Some("SELECT") | Some("WITH") | Some("VALUES") => StatementType::Select,
            Some("INSERT") | Some("REPLACE") => StatementType::Insert,
            Some("UPDATE") => StatementType::Update,
            Some("DELETE") => StatementType::Delete,
            Some("CREATE") => StatementType::Create,
            Some("DROP") => StatementType::Drop,
            Some("ALTER") => StatementType::Alter,
            Some("BEGIN") | Some("COMMIT") | Some("ROLLBACK") | Some("END") | Some("SAVEPOINT")
            | Some("RELEASE") => StatementType::Transaction,
            _ => StatementType::Other,
        }
    }
}
