/// Schema Introspection Module
///
/// Table listing and column metadata for the `:tables` and `:describe`
/// commands. Columns whose declared type has a registered adapter are
/// flagged so the shell can show which ones decode to geometry values.

use crate::core::{Result, SqlcellError};
use crate::geometry::TypeRegistry;
use rusqlite::{Connection, Row};

/// Represents a foreign key relationship
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub referenced_table: String,
    pub from_column: String,
    pub to_column: String,
}

/// A table column as reported by `pragma_table_info`
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared type, empty when the column has none
    pub decl_type: String,
    pub notnull: bool,
    pub pk: bool,
    pub default: Option<String>,
    /// Whether values of this column are decoded by a type adapter
    pub adapted: bool,
}

impl ColumnInfo {
    fn from_pragma_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ColumnInfo {
            name: row.get(0)?,
            decl_type: row.get(1)?,
            notnull: row.get(2)?,
            default: row.get(3)?,
            pk: row.get(4)?,
            adapted: false,
        })
    }
}

/// Structure of one table
#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
}

/// Names of the user tables and views, sorted.
pub fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

/// Introspects `table`, marking columns that `types` has an adapter for.
pub fn describe_table(conn: &Connection, table: &str, types: &TypeRegistry) -> Result<TableInfo> {
    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1)",
    )?;
    let mut columns = stmt
        .query_map([table], ColumnInfo::from_pragma_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if columns.is_empty() {
        return Err(SqlcellError::Query(format!("no such table: {}", table)));
    }
    for column in &mut columns {
        column.adapted = types.lookup(&column.decl_type).is_some();
    }

    let mut stmt = conn.prepare("SELECT name FROM pragma_index_list(?1) ORDER BY name")?;
    let indexes = stmt
        .query_map([table], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT \"table\", \"from\", \"to\" FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
    )?;
    let foreign_keys = stmt
        .query_map([table], |row| {
            Ok(ForeignKey {
                referenced_table: row.get(0)?,
                from_column: row.get(1)?,
                // NULL when the reference targets the primary key implicitly
                to_column: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(TableInfo {
        name: table.to_string(),
        columns,
        indexes,
        foreign_keys,
    })
}
