// Command Palette Module for sqlcell
//
// Holds the shell's command table. The REPL uses it to print `:help` and to
// suggest commands when an unknown one is typed.

#[derive(Debug, Clone, PartialEq)]
pub struct CommandInfo {
    pub name: &'static str,
    pub usage: &'static str,
    pub description: &'static str,
}

const COMMANDS: &[CommandInfo] = &[
    CommandInfo {
        name: "open",
        usage: ":open <path>",
        description: "Open a database (\":memory:\" for an in-memory one)",
    },
    CommandInfo {
        name: "close",
        usage: ":close",
        description: "Close the current database",
    },
    CommandInfo {
        name: "let",
        usage: ":let <name> = <json>",
        description: "Bind a JSON literal to a variable",
    },
    CommandInfo {
        name: "geom",
        usage: ":geom <name> = <wkt>",
        description: "Bind a geometry to a variable",
    },
    CommandInfo {
        name: "unset",
        usage: ":unset <name>",
        description: "Remove a variable",
    },
    CommandInfo {
        name: "vars",
        usage: ":vars",
        description: "List variables in scope",
    },
    CommandInfo {
        name: "into",
        usage: ":into <var> <sql>",
        description: "Run a query and bind all rows to a variable",
    },
    CommandInfo {
        name: "one",
        usage: ":one <var> <sql>",
        description: "Run a query and bind its first row to a variable",
    },
    CommandInfo {
        name: "columns",
        usage: ":columns <v1,v2,...> <sql>",
        description: "Run a query and bind each column to a variable",
    },
    CommandInfo {
        name: "tables",
        usage: ":tables",
        description: "List tables and views",
    },
    CommandInfo {
        name: "describe",
        usage: ":describe <table>",
        description: "Show the columns, indexes and foreign keys of a table",
    },
    CommandInfo {
        name: "geo",
        usage: ":geo on|off",
        description: "Toggle geometry decoding",
    },
    CommandInfo {
        name: "cancellable",
        usage: ":cancellable on|off",
        description: "Toggle cancellable query execution",
    },
    CommandInfo {
        name: "help",
        usage: ":help",
        description: "List all available commands",
    },
    CommandInfo {
        name: "quit",
        usage: ":quit",
        description: "Exit the shell",
    },
];

#[derive(Debug, Clone, Default)]
pub struct CommandPalette;

impl CommandPalette {
    pub fn new() -> Self {
        CommandPalette
    }

    pub fn commands(&self) -> &'static [CommandInfo] {
        COMMANDS
    }

    pub fn find(&self, name: &str) -> Option<&'static CommandInfo> {
        COMMANDS.iter().find(|cmd| cmd.name == name)
    }

    /// Commands whose name or description contains `query` (case-insensitive).
    pub fn filter_commands(&self, query: &str) -> Vec<&'static CommandInfo> {
        let q = query.to_lowercase();
        COMMANDS
            .iter()
            .filter(|cmd| cmd.name.contains(&q) || cmd.description.to_lowercase().contains(&q))
            .collect()
    }

    /// Text printed by `:help`.
    pub fn help_text(&self) -> String {
        let width = COMMANDS.iter().map(|c| c.usage.len()).max().unwrap_or(0);
        let mut out = String::from("Available commands:\n");
        for cmd in COMMANDS {
            out.push_str(&format!("  {:width$}  {}\n", cmd.usage, cmd.description, width = width));
        }
        out.push_str("\nAnything else is run as SQL; {name} inserts a variable as a literal,\n");
        out.push_str("{name:i} as an identifier. Use {{ and }} for literal braces.");
        out
    }
}
