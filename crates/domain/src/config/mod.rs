mod dispatch;
mod observability;
mod sessions;

pub use dispatch::*;
pub use observability::*;
pub use sessions::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Read a TOML config file.  A missing file yields the defaults; an
    /// unreadable or malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.sessions.default_timeout_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "sessions.default_timeout_secs".into(),
                message: "timeout must be greater than 0".into(),
            });
        }

        if self.sessions.expiration_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "sessions.expiration_secs".into(),
                message: "expiration must be greater than 0".into(),
            });
        } else if self.sessions.expiration_secs < self.sessions.default_timeout_secs {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "sessions.expiration_secs".into(),
                message: "shorter than default_timeout_secs; sessions may expire mid-wait".into(),
            });
        }

        if self.sessions.grace_period_ms > 10_000 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "sessions.grace_period_ms".into(),
                message: "grace periods above 10s delay every fresh invocation".into(),
            });
        }

        if self.dispatch.blocking_workers == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "dispatch.blocking_workers".into(),
                message: "at least one worker is required".into(),
            });
        }

        if self.observability.log_filter.trim().is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "observability.log_filter".into(),
                message: "empty filter; nothing will be logged unless RUST_LOG is set".into(),
            });
        }

        errors
    }
}
