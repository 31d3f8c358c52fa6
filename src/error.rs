//! Error types used across the supervisor.
//!
//! Each concern gets its own enum:
//!
//! - [`ConfigError`] — configuration loading and validation; fatal at startup.
//! - [`ProbeError`] — a single failed check attempt; consumed by the
//!   probe's debouncer and never propagated further.
//! - [`ReloadError`] — the BIRD reload command failed; logged by the apply
//!   pipeline, never terminates the supervisor.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while loading or validating the configuration file.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("config file {path} not found")]
    NotFound { path: String },

    /// The configuration file could not be read.
    #[error("could not read config: {0}")]
    Io(#[from] io::Error),

    /// The file is not valid TOML or does not match the expected schema.
    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The services table is empty or missing.
    #[error("no services configured")]
    NoServices,

    /// A service is missing its check command.
    #[error("service {service} has no command set")]
    MissingCommand { service: String },

    /// A service has an empty prefix list.
    #[error("service {service} has no prefixes set")]
    NoPrefixes { service: String },

    /// A prefix could not be parsed as a CIDR network.
    #[error("could not parse prefix {prefix} for service {service}: {source}")]
    InvalidPrefix {
        service: String,
        prefix: String,
        source: ipnet::AddrParseError,
    },

    /// The same prefix appears under more than one service.
    #[error("duplicate prefix {prefix} found")]
    DuplicatePrefix { prefix: String },
}

/// Failure of a single check command invocation.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The command did not finish before the configured deadline.
    #[error("check command timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The command ran to completion but exited non-zero.
    #[error("check command failed: {status}")]
    Failed { status: ExitStatus },

    /// The command could not be spawned or awaited.
    #[error("check command error: {0}")]
    Io(#[from] io::Error),
}

impl ProbeError {
    /// True when the failure was a deadline expiry rather than a real
    /// negative check result. Tracked separately in the metrics.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProbeError::Timeout { .. })
    }
}

/// Failure of the BIRD reload command.
#[derive(Error, Debug)]
pub enum ReloadError {
    /// The reload command did not finish before the deadline.
    #[error("reload command timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The reload command exited non-zero.
    #[error("reload command failed: {status}")]
    Failed { status: ExitStatus, stderr: String },

    /// The reload command could not be spawned or awaited.
    #[error("reload command error: {0}")]
    Io(#[from] io::Error),
}
