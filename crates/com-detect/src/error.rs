//! Error types for port detection

use thiserror::Error;

/// Errors that can occur while enumerating ports
#[derive(Debug, Error)]
pub enum DetectError {
    /// Failed to enumerate serial ports
    #[error("failed to enumerate ports: {0}")]
    EnumerationFailed(String),

    /// The blocking task running the query did not complete
    #[error("enumeration task failed: {0}")]
    TaskFailed(String),

    /// Serial port error
    #[error("serial port error: {0}")]
    SerialPort(#[from] serialport::Error),
}
