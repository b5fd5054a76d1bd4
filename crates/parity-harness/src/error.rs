//! Error types for the parity harness

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Fatal faults that abort a comparison run, resource diff or suite.
///
/// Per-case problems (transport errors, HTTP errors, unparseable bodies)
/// never surface here; they are folded into a case status instead.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A target port already has a listener
    #[error("{service} port {port} already in use; stop existing process or pick another port")]
    PortInUse { service: String, port: u16 },

    /// Failed to spawn a service process
    #[error("failed to start {service} ({program}): {source}")]
    Spawn {
        service: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Container runtime returned a failure
    #[error("failed to start container {name}: {reason}")]
    Container { name: String, reason: String },

    /// Service did not answer within the readiness deadline
    #[error("{service} at {url} did not become ready within {timeout:?}")]
    NotReady {
        service: String,
        url: String,
        timeout: Duration,
    },

    /// Failed to read a configuration or resource file
    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write the scratch configuration
    #[error("failed to prepare scratch config from {path}: {source}")]
    ScratchConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to persist a report artifact
    #[error("failed to write report {path}: {source}")]
    WriteReport {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize a report
    #[error("failed to serialize report {path}: {source}")]
    SerializeReport {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// An expected report is missing after its run
    #[error("expected report not found: {path}")]
    ReportNotFound { path: PathBuf },

    /// A report exists but could not be parsed
    #[error("failed to parse report {path}: {source}")]
    ParseReport {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A sub-run invoked by the suite exited unsuccessfully
    #[error("command failed ({code}): {command}")]
    CommandFailed { command: String, code: String },

    /// The HTTP client could not be constructed
    #[error("failed to create HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    /// Other I/O failures (current exe lookup, directory creation)
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
