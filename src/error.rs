//! Error types for campaign workflow operations.
//!
//! Defines the error types shared across subsystems:
//! - Date range construction and parsing
//! - Campaign configuration and validation
//! - Run history persistence
//! - External stage invocation

use thiserror::Error;

/// Errors raised while building a date range.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeriodError {
    #[error("Invalid date '{value}': expected YYYY-MM-DD")]
    InvalidDate { value: String },

    #[error("Period start {start} must be before end {end}")]
    EmptyRange { start: String, end: String },
}

/// Structural configuration errors. Always fatal, always raised before any
/// stage program runs.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid period: {0}")]
    Period(#[from] PeriodError),

    #[error("No primary sensors configured")]
    NoSensors,

    #[error("Sensor '{name}' has an invalid validity window: {reason}")]
    InvalidSensor { name: String, reason: String },

    #[error("Samples per month must not be negative, got {0}")]
    NegativeSampling(i64),

    #[error("Host '{0}' must provide at least one parallel slot")]
    NoSlots(String),

    #[error("No hosts configured")]
    NoHosts,

    #[error("Stage '{0}' must have a parallelism greater than 0")]
    ZeroParallelism(String),

    #[error("No stages configured")]
    NoStages,

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from the run history store. Loading never surfaces these; they are
/// logged and the affected history is ignored.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to persist history file: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("Corrupt history record at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
}

/// Errors from a single external stage invocation.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("Host '{host}' unreachable: {reason}")]
    HostUnreachable { host: String, reason: String },

    #[error("Failed to spawn '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("Stage timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Process error: {0}")]
    Process(String),
}
