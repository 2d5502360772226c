use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A specialized `Result` type for ADB operations.
pub type AdbResult<T> = Result<T, AdbError>;

/// Distinguishes a transport call that ran out of time from a condition
/// that never became true while being polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Io,
    Condition,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutKind::Io => write!(f, "I/O"),
            TimeoutKind::Condition => write!(f, "condition wait"),
        }
    }
}

/// The error type for all ADB-related operations.
#[derive(Debug, Error)]
pub enum AdbError {
    #[error("Device {serial} is unreachable: {description}")]
    TransportUnreachable { serial: String, description: String },

    #[error("Failed to connect to device {serial}: {source}")]
    ConnectionFailed {
        serial: String,
        source: adb_client::RustADBError,
    },

    #[error("Transport operation '{operation}' failed: {source}")]
    Transport {
        operation: String,
        source: adb_client::RustADBError,
    },

    #[error("ADB protocol desync (CLSE error) - connection needs to be re-established: {description}")]
    ProtocolDesync { description: String },

    #[error("Shell command '{command}' exited with status {}: {output}", display_status(.status))]
    CommandFailed {
        command: String,
        status: Option<i32>,
        output: String,
    },

    #[error("{kind} timed out after {duration:?}: {description}")]
    Timeout {
        kind: TimeoutKind,
        duration: Duration,
        description: String,
    },

    #[error("Command '{command}' produced unexpected output: {output:?}")]
    UnexpectedOutput { command: String, output: Vec<String> },

    #[error("Invalid command: {reason}")]
    InvalidCommand { reason: String },

    #[error("Invalid shell variable name {name:?}")]
    InvalidEnvVar { name: String },

    #[error("Stale cache detected (expected token {expected:?}, device has {found:?})")]
    CacheStale {
        expected: String,
        found: Option<String>,
    },

    #[error("Could not compute sync plan: {description}")]
    SyncPartialFailure { description: String },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed cache data: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("Failed to build push archive: {source}")]
    Archive {
        #[from]
        source: zip::result::ZipError,
    },

    #[error("Task failed to complete: {source}")]
    JoinError {
        #[from]
        source: tokio::task::JoinError,
    },
}

fn display_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "<missing>".to_string(),
    }
}

/// Error strings emitted by adb / adb_client when the device is gone.
pub fn is_disconnect_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("device offline")
        || lower.contains("device not found")
        || lower.contains("no devices")
        || lower.contains("connection refused")
        || lower.contains("broken pipe")
        || lower.contains("connection reset")
}

impl AdbError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AdbError::Io {
            path: path.into(),
            source,
        }
    }

    /// Check if this error indicates a protocol desync that requires reconnection
    pub fn is_protocol_desync(&self) -> bool {
        match self {
            AdbError::Transport { source, .. } => {
                let err_str = source.to_string();
                err_str.contains("CLSE") || err_str.contains("no write endpoint")
            }
            AdbError::ProtocolDesync { .. } => true,
            _ => false,
        }
    }

    /// Transport-level failures are worth another attempt; anything the device
    /// itself reported (nonzero exit, bad output) is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdbError::TransportUnreachable { .. }
                | AdbError::ConnectionFailed { .. }
                | AdbError::Transport { .. }
                | AdbError::ProtocolDesync { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AdbError::Timeout { .. })
    }

    /// Exit status of a failed shell command, if known.
    pub fn status(&self) -> Option<i32> {
        match self {
            AdbError::CommandFailed { status, .. } => *status,
            _ => None,
        }
    }

    /// Classify an adb_client error raised while running `operation`.
    pub fn from_adb_error_with_desync_check(
        serial: &str,
        operation: String,
        source: adb_client::RustADBError,
    ) -> Self {
        let err_str = source.to_string();
        if err_str.contains("CLSE") || err_str.contains("no write endpoint") {
            AdbError::ProtocolDesync {
                description: format!("'{}' failed with protocol error: {}", operation, err_str),
            }
        } else if is_disconnect_error(&err_str) {
            AdbError::TransportUnreachable {
                serial: serial.to_string(),
                description: format!("'{}' failed: {}", operation, err_str),
            }
        } else {
            AdbError::Transport { operation, source }
        }
    }
}
