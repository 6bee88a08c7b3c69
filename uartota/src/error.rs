//! Error types for uartota.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for uartota operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol phase an upload step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Handshake (VERIFY ping).
    Sync,
    /// START command announcing the image size.
    Start,
    /// DATA command carrying one chunk (zero-based index).
    Data {
        /// Index of the chunk that failed.
        chunk: usize,
    },
    /// END command finalizing the update.
    End,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => f.write_str("SYNC"),
            Self::Start => f.write_str("START"),
            Self::Data { chunk } => write!(f, "DATA (chunk {chunk})"),
            Self::End => f.write_str("END"),
        }
    }
}

/// Error type for uartota operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error, including failure to open the port.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Firmware image does not exist.
    #[error("Firmware file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Firmware image has no content.
    #[error("Firmware image is empty")]
    EmptyImage,

    /// Firmware image does not fit the 32-bit size field of START.
    #[error("Firmware image too large: {0} bytes")]
    ImageTooLarge(u64),

    /// Command payload does not fit the 16-bit length field.
    #[error("Payload too large: {0} bytes (max 65535)")]
    PayloadTooLarge(usize),

    /// No valid acknowledgment arrived before the deadline.
    #[error("{phase} timed out waiting for acknowledgment")]
    Timeout {
        /// Phase that was waiting.
        phase: Phase,
        /// Raw bytes collected while waiting, kept for diagnostics.
        received: Vec<u8>,
    },

    /// Device answered with a non-zero status.
    #[error("{phase} rejected by device (status {status}): {message}")]
    Device {
        /// Phase that was rejected.
        phase: Phase,
        /// Status byte reported by the device.
        status: u8,
        /// Message text reported by the device.
        message: String,
    },

    /// Every handshake attempt timed out.
    #[error("Handshake failed after {attempts} attempts")]
    HandshakeFailed {
        /// Number of VERIFY attempts made.
        attempts: u32,
    },

    /// Operation was interrupted by the embedding application.
    #[error("Interrupted")]
    Interrupted,

    /// Malformed frame handed to a decoder.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether a fresh attempt of the same step may succeed.
    ///
    /// Only handshake timeouts qualify; every other failure aborts the session.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout {
                phase: Phase::Sync,
                ..
            }
        )
    }

    /// Phase the error is attributed to, if it came from the protocol.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Timeout { phase, .. } | Self::Device { phase, .. } => Some(*phase),
            Self::HandshakeFailed { .. } => Some(Phase::Sync),
            _ => None,
        }
    }
}
