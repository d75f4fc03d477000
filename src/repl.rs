use crate::command_palette::CommandPalette;
use crate::config::Config;
use crate::core::db::{
    describe_table, execute_blocking, list_tables, ConnectionHandle, ExecutionController,
    QueryResult, TableInfo,
};
use crate::core::{CancellationToken, CommandResult, Result, SqlcellError};
use crate::geometry::{default_adapter, GeometryAdapter, OpaqueAdapter};
use crate::scope::{is_valid_identifier, Scope};
use crate::value::Value;
use reedline::{DefaultPrompt, DefaultPromptSegment, Reedline, Signal};
use std::io::{self, BufRead, IsTerminal};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Represents a parsed REPL command.
#[derive(Debug, PartialEq)]
pub enum Command {
    Open(String),
    Close,
    Let { name: String, json: String },
    Geom { name: String, wkt: String },
    Unset(String),
    Vars,
    Into { var: String, sql: String },
    One { var: String, sql: String },
    Columns { vars: Vec<String>, sql: String },
    Tables,
    Describe(String),
    Geo(bool),
    Cancellable(bool),
    Help,
    Quit,
    Sql(String),
    Unknown(String),
}

/// Parses a user input string into a corresponding `Command`.
///
/// If the input starts with a colon (`:`), it is interpreted as a command.
/// Otherwise, it is treated as a SQL query.
pub fn parse_command(input: &str) -> Command {
    let input = input.trim();
    let Some(trimmed) = input.strip_prefix(':') else {
        return Command::Sql(input.to_string());
    };
    let (name, rest) = split_word(trimmed);
    let unknown = || Command::Unknown(input.to_string());

    match name {
        "open" if !rest.is_empty() => Command::Open(rest.to_string()),
        "close" => Command::Close,
        "let" => match parse_binding(rest) {
            Some((name, json)) => Command::Let { name, json },
            None => unknown(),
        },
        "geom" => match parse_binding(rest) {
            Some((name, wkt)) => Command::Geom { name, wkt },
            None => unknown(),
        },
        "unset" if !rest.is_empty() => Command::Unset(rest.to_string()),
        "vars" => Command::Vars,
        "into" | "one" | "columns" => {
            let (target, sql) = split_word(rest);
            if target.is_empty() || sql.is_empty() {
                return unknown();
            }
            let var = target.to_string();
            let sql = sql.to_string();
            match name {
                "into" => Command::Into { var, sql },
                "one" => Command::One { var, sql },
                _ => {
                    let vars: Vec<String> = target.split(',').map(str::to_string).collect();
                    if vars.iter().any(String::is_empty) {
                        return unknown();
                    }
                    Command::Columns { vars, sql }
                }
            }
        }
        "tables" => Command::Tables,
        "describe" if !rest.is_empty() => Command::Describe(rest.to_string()),
        "geo" => match parse_switch(rest) {
            Some(on) => Command::Geo(on),
            None => unknown(),
        },
        "cancellable" => match parse_switch(rest) {
            Some(on) => Command::Cancellable(on),
            None => unknown(),
        },
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => unknown(),
    }
}

fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim();
    match input.find(char::is_whitespace) {
        Some(i) => (&input[..i], input[i..].trim()),
        None => (input, ""),
    }
}

/// `name = value` -> (`name`, `value`)
fn parse_binding(input: &str) -> Option<(String, String)> {
    let (name, value) = input.split_once('=')?;
    let (name, value) = (name.trim(), value.trim());
    if name.is_empty() || value.is_empty() {
        return None;
    }
    Some((name.to_string(), value.to_string()))
}

fn parse_switch(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn check_variable_name(name: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(SqlcellError::Command(format!(
            "'{}' is not a valid variable name",
            name
        )))
    }
}

/// Interactive session state: the open connection, the variable scope and
/// the toggles set through commands.
pub struct Shell {
    config: Config,
    connection: Option<ConnectionHandle>,
    scope: Scope,
    token: CancellationToken,
    geometry: bool,
    cancellable: bool,
    palette: CommandPalette,
}

impl Shell {
    pub fn new(config: Config) -> Self {
        let geometry = config.geometry.enabled;
        let cancellable = config.session.cancellable;
        Shell {
            config,
            connection: None,
            scope: Scope::new(),
            token: CancellationToken::new(),
            geometry,
            cancellable,
            palette: CommandPalette::new(),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }

    pub fn connection(&self) -> Result<&ConnectionHandle> {
        self.connection.as_ref().ok_or(SqlcellError::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Token cancelled by Ctrl+C while a query runs.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Parses and executes one line of input.
    pub fn handle(&mut self, line: &str) -> CommandResult {
        self.execute(parse_command(line))
    }

    pub fn execute(&mut self, command: Command) -> CommandResult {
        debug!(?command, "executing command");
        match command {
            Command::Open(path) => self.open(&path),
            Command::Close => match self.connection.take() {
                Some(_) => Ok(Some("Database closed".to_string())),
                None => Err(SqlcellError::NotConnected),
            },
            Command::Let { name, json } => {
                check_variable_name(&name)?;
                let value = Value::from_json(serde_json::from_str(&json)?)?;
                self.scope.set(name, value);
                Ok(None)
            }
            Command::Geom { name, wkt } => {
                check_variable_name(&name)?;
                let geometry = self.geometry_encoder().decode(&wkt)?;
                self.scope.set(name, geometry);
                Ok(None)
            }
            Command::Unset(name) => match self.scope.remove(&name) {
                Some(_) => Ok(None),
                None => Err(SqlcellError::Command(format!(
                    "variable '{}' is not defined",
                    name
                ))),
            },
            Command::Vars => Ok(Some(self.format_vars())),
            Command::Into { var, sql } => {
                check_variable_name(&var)?;
                let result = self.run_sql(&sql)?;
                self.scope.set(var.as_str(), result.to_value());
                Ok(Some(format!("{} row(s) bound to '{}'", result.row_count, var)))
            }
            Command::One { var, sql } => {
                check_variable_name(&var)?;
                let result = self.run_sql(&sql)?;
                self.scope.set(var.as_str(), result.first_row_value());
                if result.row_count == 0 {
                    Ok(Some(format!("Warning: query returned no rows; '{}' set to NULL", var)))
                } else {
                    Ok(None)
                }
            }
            Command::Columns { vars, sql } => {
                for var in &vars {
                    check_variable_name(var)?;
                }
                let result = self.run_sql(&sql)?;
                self.bind_columns(&vars, &result)?;
                Ok(None)
            }
            Command::Tables => {
                let tables = self.connection()?.with_connection(list_tables)?;
                if tables.is_empty() {
                    Ok(Some("No tables found".to_string()))
                } else {
                    Ok(Some(tables.join("\n")))
                }
            }
            Command::Describe(table) => {
                let handle = self.connection()?;
                let types = handle.types();
                let info = handle.with_connection(|conn| describe_table(conn, &table, &types))?;
                Ok(Some(format_table_info(&info)))
            }
            Command::Geo(on) => {
                self.geometry = on;
                if let Some(handle) = &self.connection {
                    handle.register_geometry(self.column_adapter())?;
                }
                info!(enabled = on, "geometry integration toggled");
                Ok(Some(format!("Geometry integration {}", on_off(on))))
            }
            Command::Cancellable(on) => {
                self.cancellable = on;
                Ok(Some(format!("Cancellable execution {}", on_off(on))))
            }
            Command::Help => Ok(Some(self.palette.help_text())),
            Command::Quit => Ok(None),
            Command::Sql(sql) => {
                if sql.trim().is_empty() {
                    return Ok(None);
                }
                let result = self.run_sql(&sql)?;
                Ok(Some(format_result(&result, self.config.display.row_limit)))
            }
            Command::Unknown(input) => Err(self.unknown_command(&input)),
        }
    }

    fn open(&mut self, path: &str) -> CommandResult {
        let handle = ConnectionHandle::open(path)?;
        handle.register_geometry(self.column_adapter())?;
        self.connection = Some(handle);
        info!(path, "database opened");
        Ok(Some(format!("Opened database: {}", path)))
    }

    /// Substitutes `sql` against the current scope and runs it.
    pub fn run_sql(&mut self, sql: &str) -> Result<QueryResult> {
        let handle = self.connection()?.clone();
        let rendered = handle.substitute(sql, &self.scope)?;
        debug!(sql = %rendered, "query rendered");

        let result = if self.cancellable {
            self.token.reset();
            let _watcher = crate::interrupt::InterruptWatcher::spawn(&self.token);
            ExecutionController::with_options(handle, self.config.exec_options())
                .execute(&rendered, &self.token)
        } else {
            execute_blocking(&handle, &rendered, self.config.geometry.decode_policy)
        };

        if let Err(SqlcellError::ConnectionLost(reason)) = &result {
            warn!(%reason, "dropping lost connection");
            self.connection = None;
        }
        result
    }

    fn bind_columns(&mut self, vars: &[String], result: &QueryResult) -> Result<()> {
        let width = result.columns.len();
        if let [only] = vars {
            let columns = (0..width).filter_map(|i| result.column_values(i)).collect();
            self.scope.set(only.as_str(), Value::List(columns));
            return Ok(());
        }
        if vars.len() != width {
            return Err(SqlcellError::Command(format!(
                "query returned {} column(s) but {} variable name(s) were given",
                width,
                vars.len()
            )));
        }
        for (i, var) in vars.iter().enumerate() {
            let values = result.column_values(i).unwrap_or(Value::Null);
            self.scope.set(var.as_str(), values);
        }
        Ok(())
    }

    /// Adapter for geometry columns; with integration off, values stay
    /// undecoded as `Geometry::Opaque`.
    fn column_adapter(&self) -> Arc<dyn GeometryAdapter> {
        if self.geometry {
            default_adapter()
        } else {
            Arc::new(OpaqueAdapter)
        }
    }

    fn geometry_encoder(&self) -> Arc<dyn GeometryAdapter> {
        match &self.connection {
            Some(handle) => handle.types().encoder(),
            None => self.column_adapter(),
        }
    }

    fn format_vars(&self) -> String {
        if self.scope.is_empty() {
            return "No variables defined".to_string();
        }
        self.scope
            .iter()
            .map(|(name, value)| format!("{} ({}) = {}", name, value.type_name(), value.to_json()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn unknown_command(&self, input: &str) -> SqlcellError {
        let name = input.trim_start_matches(':').split_whitespace().next().unwrap_or("");
        if let Some(cmd) = self.palette.find(name) {
            return SqlcellError::Command(format!("usage: {}", cmd.usage));
        }
        let suggestions = if name.is_empty() {
            Vec::new()
        } else {
            self.palette.filter_commands(name)
        };
        if suggestions.is_empty() {
            SqlcellError::Command(format!("unknown command '{}' (type :help)", input))
        } else {
            let names: Vec<String> = suggestions.iter().map(|c| format!(":{}", c.name)).collect();
            SqlcellError::Command(format!(
                "unknown command '{}'; did you mean {}?",
                input,
                names.join(", ")
            ))
        }
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

/// Renders a query result for the terminal.
///
/// Statements without result columns report the number of affected rows; an
/// empty result set is reported as a warning; otherwise at most `row_limit`
/// rows are printed as a table.
pub fn format_result(result: &QueryResult, row_limit: usize) -> String {
    if !result.returns_rows() {
        return format!(
            "Statement executed successfully ({} row(s) affected)",
            result.changes
        );
    }
    if result.row_count == 0 {
        return "Warning: query returned no rows".to_string();
    }

    let shown = &result.rows[..result.rows.len().min(row_limit)];
    let headers = result.column_names();
    let cells: Vec<Vec<String>> = shown
        .iter()
        .map(|row| row.iter().map(|v| v.to_string()).collect())
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let mut out = render_line(headers.iter().copied(), &widths);
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    for row in &cells {
        out.push('\n');
        out.push_str(&render_line(row.iter().map(String::as_str), &widths));
    }

    let noun = if result.row_count == 1 { "row" } else { "rows" };
    out.push_str(&format!("\n\n({} {})", result.row_count, noun));
    if result.row_count > shown.len() {
        out.push_str(&format!(
            "\nWarning: showing first {} of {} rows",
            shown.len(),
            result.row_count
        ));
    }
    for error in &result.decode_errors {
        out.push_str(&format!("\nWarning: could not decode geometry at {}", error.message));
    }
    out
}

fn render_line<'a>(values: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    values
        .zip(widths)
        .map(|(v, w)| format!("{:<width$}", v, width = *w))
        .collect::<Vec<_>>()
        .join(" | ")
        .trim_end()
        .to_string()
}

fn format_table_info(info: &TableInfo) -> String {
    let mut out = format!("Table: {}\n", info.name);
    for column in &info.columns {
        let mut flags = Vec::new();
        if column.pk {
            flags.push("PRIMARY KEY".to_string());
        }
        if column.notnull {
            flags.push("NOT NULL".to_string());
        }
        if let Some(default) = &column.default {
            flags.push(format!("DEFAULT {}", default));
        }
        if column.adapted {
            flags.push("[geometry]".to_string());
        }
        let decl = if column.decl_type.is_empty() { "ANY" } else { column.decl_type.as_str() };
        out.push_str(&format!("  {} {} {}", column.name, decl, flags.join(" ")).trim_end());
        out.push('\n');
    }
    if !info.indexes.is_empty() {
        out.push_str(&format!("Indexes: {}\n", info.indexes.join(", ")));
    }
    for fk in &info.foreign_keys {
        out.push_str(&format!(
            "Foreign key: {} -> {}({})\n",
            fk.from_column, fk.referenced_table, fk.to_column
        ));
    }
    out.trim_end().to_string()
}

fn print_outcome(outcome: CommandResult) {
    match outcome {
        Ok(Some(message)) => println!("{}", message),
        Ok(None) => {}
        Err(SqlcellError::ConnectionLost(reason)) => {
            eprintln!("Error: connection lost: {}", reason);
            eprintln!("Reopen the database with :open <path>");
        }
        Err(e) => eprintln!("Error: {}", e),
    }
}

/// Runs the shell until `:quit` or end of input.
///
/// A terminal gets a line editor; piped input is read line by line.
pub fn run_repl(shell: &mut Shell) -> Result<()> {
    if io::stdin().is_terminal() {
        run_interactive(shell)
    } else {
        run_script(shell, io::stdin().lock())
    }
}

fn run_interactive(shell: &mut Shell) -> Result<()> {
    println!("Welcome to the sqlcell REPL! Type :help for commands, :quit to exit.");
    let mut line_editor = Reedline::create();
    let prompt = DefaultPrompt::new(
        DefaultPromptSegment::Basic("sqlcell".to_string()),
        DefaultPromptSegment::Empty,
    );

    loop {
        match line_editor.read_line(&prompt)? {
            Signal::Success(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let command = parse_command(line);
                if command == Command::Quit {
                    break;
                }
                print_outcome(shell.execute(command));
            }
            Signal::CtrlD => break,
            Signal::CtrlC => continue,
            #[allow(unreachable_patterns)]
            _ => continue,
        }
    }
    Ok(())
}

/// Executes each line of `input` in turn.
pub fn run_script<R: BufRead>(shell: &mut Shell, input: R) -> Result<()> {
    for line in input.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with("--") {
            continue;
        }
        let command = parse_command(line);
        if command == Command::Quit {
            break;
        }
        print_outcome(shell.execute(command));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use std::io::Write;

    fn memory_shell() -> Shell {
        let mut shell = Shell::new(Config::default());
        shell.handle(":open :memory:").unwrap();
        shell
    }

    #[test]
    fn test_parse_open_command() {
        let cmd = parse_command(":open database.db");
        assert_eq!(cmd, Command::Open("database.db".to_string()));
    }

    #[test]
    fn test_parse_binding_commands() {
        assert_eq!(
            parse_command(":let ids = [1, 2, 3]"),
            Command::Let {
                name: "ids".to_string(),
                json: "[1, 2, 3]".to_string()
            }
        );
        assert_eq!(
            parse_command(":geom area = POINT(1 2)"),
            Command::Geom {
                name: "area".to_string(),
                wkt: "POINT(1 2)".to_string()
            }
        );
        assert_eq!(
            parse_command(":columns a, b SELECT 1, 2"),
            Command::Unknown(":columns a, b SELECT 1, 2".to_string())
        );
        assert_eq!(
            parse_command(":columns a,b SELECT 1, 2"),
            Command::Columns {
                vars: vec!["a".to_string(), "b".to_string()],
                sql: "SELECT 1, 2".to_string()
            }
        );
        assert_eq!(
            parse_command(":into rows   SELECT * FROM t"),
            Command::Into {
                var: "rows".to_string(),
                sql: "SELECT * FROM t".to_string()
            }
        );
    }

    #[test]
    fn test_parse_switches() {
        assert_eq!(parse_command(":geo off"), Command::Geo(false));
        assert_eq!(parse_command(":cancellable ON"), Command::Cancellable(true));
        assert_eq!(parse_command(":geo maybe"), Command::Unknown(":geo maybe".to_string()));
    }

    #[test]
    fn test_parse_unknown_command() {
        let cmd = parse_command(":invalid");
        assert_eq!(cmd, Command::Unknown(":invalid".to_string()));
        assert_eq!(parse_command(":let x"), Command::Unknown(":let x".to_string()));
    }

    #[test]
    fn test_parse_sql_query() {
        let cmd = parse_command("SELECT * FROM users");
        assert_eq!(cmd, Command::Sql("SELECT * FROM users".to_string()));
    }

    #[test]
    fn test_sql_requires_connection() {
        let mut shell = Shell::new(Config::default());
        assert!(matches!(shell.handle("SELECT 1"), Err(SqlcellError::NotConnected)));
    }

    #[test]
    fn test_let_and_substitute() {
        let mut shell = memory_shell();
        shell.handle(":let name = \"O'Brien\"").unwrap();
        shell.handle(":one greeting SELECT 'hi ' || {name}").unwrap();
        assert_eq!(
            shell.scope().get("greeting"),
            Some(&Value::Text("hi O'Brien".to_string()))
        );

        assert!(matches!(
            shell.handle(":let 2x = 1"),
            Err(SqlcellError::Command(_))
        ));
        assert!(matches!(
            shell.handle("SELECT {missing}"),
            Err(SqlcellError::UnresolvedVariable(_))
        ));
    }

    #[test]
    fn test_into_and_columns_bindings() {
        let mut shell = memory_shell();
        shell
            .handle("CREATE TABLE t (id INTEGER, name TEXT)")
            .unwrap();
        shell
            .handle("INSERT INTO t VALUES (1, 'a'), (2, 'b')")
            .unwrap();

        let message = shell.handle(":into rows SELECT id, name FROM t ORDER BY id").unwrap();
        assert_eq!(message.as_deref(), Some("2 row(s) bound to 'rows'"));
        assert_eq!(
            shell.scope().get("rows"),
            Some(&Value::List(vec![
                Value::List(vec![Value::Integer(1), Value::from("a")]),
                Value::List(vec![Value::Integer(2), Value::from("b")]),
            ]))
        );

        shell.handle(":columns ids,names SELECT id, name FROM t ORDER BY id").unwrap();
        assert_eq!(
            shell.scope().get("ids"),
            Some(&Value::List(vec![Value::Integer(1), Value::Integer(2)]))
        );

        // A bound list feeds an IN clause
        let out = shell.handle("SELECT count(*) AS n FROM t WHERE id IN {ids}").unwrap().unwrap();
        assert!(out.contains("2"));

        assert!(matches!(
            shell.handle(":columns a,b,c SELECT id, name FROM t"),
            Err(SqlcellError::Command(_))
        ));
    }

    #[test]
    fn test_one_without_rows_warns() {
        let mut shell = memory_shell();
        let message = shell.handle(":one x SELECT 1 WHERE 0").unwrap().unwrap();
        assert!(message.starts_with("Warning"));
        assert_eq!(shell.scope().get("x"), Some(&Value::Null));
    }

    #[test]
    fn test_unset_and_vars() {
        let mut shell = memory_shell();
        shell.handle(":let flag = true").unwrap();
        let vars = shell.handle(":vars").unwrap().unwrap();
        assert!(vars.contains("flag (bool) = true"), "{}", vars);
        shell.handle(":unset flag").unwrap();
        assert!(shell.handle(":unset flag").is_err());
        assert_eq!(shell.handle(":vars").unwrap().as_deref(), Some("No variables defined"));
    }

    #[test]
    fn test_blocking_mode_runs_queries() {
        let mut shell = memory_shell();
        shell.handle(":cancellable off").unwrap();
        let out = shell.handle("SELECT 7 AS seven").unwrap().unwrap();
        assert!(out.contains("seven"));
        assert!(out.contains("7"));
    }

    #[test]
    fn test_format_result_variants() {
        let mut shell = memory_shell();
        let created = shell.handle("CREATE TABLE t (x INTEGER)").unwrap().unwrap();
        assert!(created.starts_with("Statement executed successfully"));
        let inserted = shell.handle("INSERT INTO t VALUES (1), (2), (3)").unwrap().unwrap();
        assert!(inserted.contains("3 row(s) affected"));
        let empty = shell.handle("SELECT x FROM t WHERE x > 10").unwrap().unwrap();
        assert_eq!(empty, "Warning: query returned no rows");

        let result = shell.run_sql("SELECT x FROM t ORDER BY x").unwrap();
        let table = format_result(&result, 2);
        assert!(table.contains("(3 rows)"));
        assert!(table.contains("Warning: showing first 2 of 3 rows"));
        assert!(!table.lines().any(|l| l.trim() == "3"));
    }

    #[test]
    fn test_tables_and_describe() {
        let mut shell = memory_shell();
        assert_eq!(shell.handle(":tables").unwrap().as_deref(), Some("No tables found"));
        shell
            .handle("CREATE TABLE places (id INTEGER PRIMARY KEY, location POINT)")
            .unwrap();
        assert_eq!(shell.handle(":tables").unwrap().as_deref(), Some("places"));
        let described = shell.handle(":describe places").unwrap().unwrap();
        assert!(described.contains("location POINT [geometry]"), "{}", described);

        // still a geometry column, now passed through undecoded
        shell.handle(":geo off").unwrap();
        let described = shell.handle(":describe places").unwrap().unwrap();
        assert!(described.contains("location POINT [geometry]"), "{}", described);
    }

    #[cfg(feature = "geo")]
    #[test]
    fn test_geometry_round_trip_through_shell() {
        let mut shell = memory_shell();
        shell.handle("CREATE TABLE places (id INTEGER, location POINT)").unwrap();
        shell.handle(":geom p = POINT(1.5 2.5)").unwrap();
        shell.handle("INSERT INTO places VALUES (1, {p})").unwrap();
        shell.handle(":one back SELECT location FROM places").unwrap();

        match shell.scope().get("back") {
            Some(Value::Geometry(g)) => assert_eq!(g, shell.scope().get("p").and_then(Value::as_geometry).unwrap()),
            other => panic!("expected geometry, got {:?}", other),
        }

        assert!(matches!(
            shell.handle(":geom bad = POINT(1"),
            Err(SqlcellError::GeometryDecode(_))
        ));
    }

    #[test]
    fn test_opaque_geometry_when_disabled() {
        let mut shell = memory_shell();
        shell.handle(":geo off").unwrap();
        shell.handle("CREATE TABLE places (location POINT)").unwrap();
        shell.handle("INSERT INTO places VALUES ('POINT(1 2)')").unwrap();
        shell.handle(":one raw SELECT location FROM places").unwrap();
        assert_eq!(
            shell.scope().get("raw"),
            Some(&Value::Geometry(Geometry::Opaque("POINT(1 2)".to_string())))
        );

        // re-enabling switches the same column back to decoded values
        shell.handle(":geo on").unwrap();
        shell.handle(":one decoded SELECT location FROM places").unwrap();
        let decoded = shell.scope().get("decoded").and_then(Value::as_geometry).unwrap();
        assert_eq!(decoded.is_opaque(), cfg!(not(feature = "geo")));

        // a database opened while disabled starts out opaque
        shell.handle(":geo off").unwrap();
        shell.handle(":open :memory:").unwrap();
        assert_eq!(shell.connection().unwrap().types().encoder().name(), "opaque");
        assert!(shell.connection().unwrap().types().has_geometry());
    }

    #[test]
    fn test_lost_connection_is_dropped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&b"garbage, not an sqlite file\n".repeat(200)).unwrap();
        file.flush().unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let mut shell = Shell::new(Config::default());
        shell.handle(&format!(":open {}", path)).unwrap();
        assert!(shell.is_connected());

        match shell.run_sql("SELECT count(*) FROM sqlite_master") {
            Err(SqlcellError::ConnectionLost(_)) => {}
            other => panic!("expected lost connection, got {:?}", other),
        }
        assert!(!shell.is_connected());
        assert!(matches!(shell.handle("SELECT 1"), Err(SqlcellError::NotConnected)));

        // the blocking path reports the same failure
        shell.handle(&format!(":open {}", path)).unwrap();
        shell.handle(":cancellable off").unwrap();
        assert!(matches!(
            shell.run_sql("SELECT count(*) FROM sqlite_master"),
            Err(SqlcellError::ConnectionLost(_))
        ));
        assert!(!shell.is_connected());
    }

    #[test]
    fn test_unknown_command_suggestions() {
        let shell = Shell::new(Config::default());
        match shell.unknown_command(":ope") {
            SqlcellError::Command(msg) => assert!(msg.contains(":open"), "{}", msg),
            other => panic!("unexpected {:?}", other),
        }
        match shell.unknown_command(":open") {
            SqlcellError::Command(msg) => assert_eq!(msg, "usage: :open <path>"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_close_and_help() {
        let mut shell = memory_shell();
        assert!(shell.handle(":help").unwrap().unwrap().contains(":into <var> <sql>"));
        assert_eq!(shell.handle(":close").unwrap().as_deref(), Some("Database closed"));
        assert!(!shell.is_connected());
        assert!(matches!(shell.handle(":close"), Err(SqlcellError::NotConnected)));
    }

    #[test]
    fn test_run_script_stops_at_quit() {
        let mut shell = Shell::new(Config::default());
        let input = ":open :memory:\n:let a = 1\n:quit\n:let b = 2\n";
        run_script(&mut shell, input.as_bytes()).unwrap();
        assert!(shell.scope().contains("a"));
        assert!(!shell.scope().contains("b"));
    }
}
