use crate::core::db::{DecodePolicy, ExecOptions};
use crate::core::{Result, SqlcellError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration structure parsed from a TOML file.
///
/// Every section and key is optional; missing values take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub geometry: GeometryConfig,
    pub display: DisplayConfig,
}

/// Query execution settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Run queries on a worker thread so they can be cancelled
    pub cancellable: bool,
    pub poll_interval_ms: u64,
    pub timeout_ms: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            cancellable: true,
            poll_interval_ms: 100,
            timeout_ms: None,
        }
    }
}

/// Geometry integration settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    pub enabled: bool,
    pub decode_policy: DecodePolicy,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        GeometryConfig {
            enabled: true,
            decode_policy: DecodePolicy::Collect,
        }
    }
}

/// Result display settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Maximum number of rows printed for one result
    pub row_limit: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig { row_limit: 500 }
    }
}

impl Config {
    /// Execution options derived from the session and geometry sections.
    pub fn exec_options(&self) -> ExecOptions {
        ExecOptions {
            // A zero interval would turn polling into a busy loop
            poll_interval: Duration::from_millis(self.session.poll_interval_ms.max(1)),
            timeout: self.session.timeout_ms.map(Duration::from_millis),
            decode_policy: self.geometry.decode_policy,
        }
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Arguments
///
/// * `path` - The file path to the TOML configuration file.
///
/// # Example
///
/// ```no_run
/// let config = sqlcell::config::load_config("config.toml").expect("Failed to load config");
/// println!("{:?}", config);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| SqlcellError::Config(format!("{}: {}", path.display(), e)))?;
    toml::from_str(&content).map_err(|e| SqlcellError::Config(format!("{}: {}", path.display(), e)))
}

/// `<config dir>/sqlcell/config.toml`, if the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sqlcell").join("config.toml"))
}

/// Loads `path` if given, else the default file if it exists, else defaults.
///
/// An explicitly given path must exist.
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_config(path),
        None => match default_config_path() {
            Some(path) if path.is_file() => load_config(path),
            _ => Ok(Config::default()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE_CONFIG: &str = r#"
[session]
cancellable = false
poll_interval_ms = 25
timeout_ms = 30000

[geometry]
enabled = false
decode_policy = "fail_fast"

[display]
row_limit = 20
"#;

    #[test]
    fn test_load_config_from_str() {
        let config: Config = toml::from_str(SAMPLE_CONFIG).expect("Failed to parse sample config");
        assert!(!config.session.cancellable);
        assert_eq!(config.session.poll_interval_ms, 25);
        assert_eq!(config.session.timeout_ms, Some(30000));
        assert!(!config.geometry.enabled);
        assert_eq!(config.geometry.decode_policy, DecodePolicy::FailFast);
        assert_eq!(config.display.row_limit, 20);

        let options = config.exec_options();
        assert_eq!(options.poll_interval, Duration::from_millis(25));
        assert_eq!(options.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config: Config = toml::from_str("[display]\nrow_limit = 5\n").unwrap();
        assert!(config.session.cancellable);
        assert_eq!(config.session.poll_interval_ms, 100);
        assert!(config.geometry.enabled);
        assert_eq!(config.geometry.decode_policy, DecodePolicy::Collect);
        assert_eq!(config.display.row_limit, 5);

        let empty: Config = toml::from_str("").unwrap();
        assert_eq!(empty, Config::default());
    }

    #[test]
    fn test_load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_CONFIG.as_bytes()).unwrap();
        let config = load_or_default(Some(file.path())).unwrap();
        assert_eq!(config.display.row_limit, 20);
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[geometry]\ndecode_policy = \"sometimes\"\n").unwrap();
        assert!(matches!(load_config(file.path()), Err(SqlcellError::Config(_))));
        assert!(matches!(
            load_config("/nonexistent/sqlcell.toml"),
            Err(SqlcellError::Config(_))
        ));
    }
}
