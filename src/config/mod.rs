//! Configuration management.
//!
//! Engines are configured explicitly; there is no process-wide default
//! engine. Configuration can be built in code, loaded from a TOML file, and
//! overridden from `MIRAGE_*` environment variables.

use crate::observability::{LogFormat, LoggingConfig};
use serde::Deserialize;
use std::path::Path;

/// Main configuration for a mirage engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MirageConfig {
    /// Prefix prepended to every generated table name.
    pub table_prefix: String,
    /// Log every generated statement at debug level.
    pub log_statements: bool,
    /// Record operation counters and latencies through `metrics`.
    pub metrics_enabled: bool,
    /// Logging setup used by [`crate::observability::init_logging`].
    pub logging: LoggingConfig,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Table name prefix.
    pub table_prefix: Option<String>,
    /// Statement logging.
    pub log_statements: Option<bool>,
    /// Metrics recording.
    pub metrics_enabled: Option<bool>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLogging {
    /// Output format: "pretty", "compact" or "json".
    pub format: Option<String>,
    /// Filter directive.
    pub filter: Option<String>,
}

impl MirageConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
                operation: "read_config_file".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;

        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration TOML.
    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| crate::Error::OperationFailed {
                operation: "parse_config_file".to_string(),
                cause: e.to_string(),
            })?;

        Ok(Self::from_config_file(file))
    }

    /// Builds configuration from defaults plus environment overrides.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().apply_env_overrides()
    }

    /// Applies `MIRAGE_*` environment variable overrides.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `MIRAGE_TABLE_PREFIX` | `table_prefix` |
    /// | `MIRAGE_LOG_STATEMENTS` | `log_statements` |
    /// | `MIRAGE_METRICS_ENABLED` | `metrics_enabled` |
    /// | `MIRAGE_LOG_FORMAT` | `logging.format` |
    #[must_use]
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    #[must_use]
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(prefix) = lookup("MIRAGE_TABLE_PREFIX") {
            self.table_prefix = prefix.trim().to_string();
        }
        if let Some(v) = lookup("MIRAGE_LOG_STATEMENTS").map(|v| parse_bool(&v)) {
            self.log_statements = v;
        }
        if let Some(v) = lookup("MIRAGE_METRICS_ENABLED").map(|v| parse_bool(&v)) {
            self.metrics_enabled = v;
        }
        if let Some(format) = lookup("MIRAGE_LOG_FORMAT") {
            self.logging.format = LogFormat::parse(&format);
        }
        self
    }

    /// Converts a `ConfigFile` to `MirageConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(prefix) = file.table_prefix {
            config.table_prefix = prefix;
        }
        if let Some(v) = file.log_statements {
            config.log_statements = v;
        }
        if let Some(v) = file.metrics_enabled {
            config.metrics_enabled = v;
        }
        if let Some(logging) = file.logging {
            if let Some(format) = logging.format {
                config.logging.format = LogFormat::parse(&format);
            }
            if let Some(filter) = logging.filter {
                config.logging.filter = filter;
            }
        }

        config
    }

    /// Sets the table prefix.
    #[must_use]
    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    /// Enables or disables statement logging.
    #[must_use]
    pub const fn with_log_statements(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }

    /// Enables or disables metrics recording.
    #[must_use]
    pub const fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }
}

fn parse_bool(value: &str) -> bool {
    let value = value.trim().to_lowercase();
    value == "true" || value == "1" || value == "yes"
}
