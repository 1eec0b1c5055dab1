//! Error types shared across the daemon

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown or forbidden action '{0}'")]
    InvalidAction(String),

    #[error("invalid threshold: {count} times within {cycles} cycles")]
    InvalidThreshold { count: u8, cycles: u8 },

    #[error("service '{0}' is defined more than once")]
    DuplicateService(String),

    #[error("service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("process service '{0}' has no pidfile")]
    MissingPidfile(String),

    #[error("invalid restart limit on '{service}': {count} restarts within {cycles} cycles")]
    InvalidRestartLimit {
        service: String,
        count: u32,
        cycles: u32,
    },

    #[error("exec action on '{0}' has no command")]
    MissingExec(String),

    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("cannot build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("cannot read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors raised while running a configured command
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("'{}' is not an executable file", .0.display())]
    NotExecutable(PathBuf),

    #[error("failed to execute '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the notification transports
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("endpoint answered with status {0}")]
    Status(reqwest::StatusCode),

    #[error("{failed} of {total} recipients could not be notified")]
    Recipients { failed: usize, total: usize },

    #[error("no endpoint configured")]
    NoEndpoint,
}
