//! Error types for rocc.

use std::io;
use thiserror::Error;

/// Result type for rocc operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for rocc operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The channel ended (port closed or device gone).
    #[error("Channel closed")]
    ChannelClosed,

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Protocol error (missing or unexpected response).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The device reported a size that is not a non-negative integer.
    #[error("Invalid file size: {0:?}")]
    InvalidFileSize(String),

    /// The challenge returned by the device is empty or not hex.
    #[error("Invalid challenge: {0}")]
    InvalidChallenge(String),

    /// The device refused the authentication proof.
    #[error("Authentication rejected: {0:?}")]
    AuthRejected(String),

    /// The channel ended before the declared number of bytes arrived.
    #[error("Short transfer: expected {expected} bytes, received {received}")]
    ShortTransfer {
        /// Declared size.
        expected: u64,
        /// Bytes actually received.
        received: u64,
    },

    /// The embedding application requested interruption.
    #[error("Interrupted")]
    Interrupted,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
