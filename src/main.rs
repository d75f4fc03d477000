use clap::Parser;
use sqlcell::config;
use sqlcell::repl::{self, Shell};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sqlcell", version, about = "SQLite shell with templated queries")]
struct Cli {
    /// Database file to open at startup
    database: Option<String>,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    // Logs go to stderr so query output on stdout stays clean
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match config::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };
    info!(?config, "starting sqlcell");

    let mut shell = Shell::new(config);
    if let Some(db_path) = &cli.database {
        match shell.handle(&format!(":open {}", db_path)) {
            Ok(_) => info!(path = %db_path, "database opened from command line"),
            Err(e) => eprintln!("Failed to open database: {}", e),
        }
    }

    match repl::run_repl(&mut shell) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "shell terminated");
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
