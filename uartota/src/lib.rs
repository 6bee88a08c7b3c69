//! # uartota
//!
//! A library for uploading firmware to a microcontroller over a serial link
//! using a small framed OTA protocol.
//!
//! This crate provides:
//!
//! - CRC16-XMODEM checksum calculation
//! - Command frame encoding and acknowledgment decoding
//! - Acknowledgment resynchronization over a noisy, shared console UART
//! - RTS/DTR reset of the target into run mode
//! - The upload session: handshake, START, DATA chunks, END
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via `serialport`
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use uartota::{FirmwareImage, NativePort, SerialConfig, SystemClock, UploadSession};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_file("firmware.bin")?;
//!     let port = NativePort::open(&SerialConfig::new("/dev/ttyUSB0", 2_000_000))?;
//!
//!     // Resets the device, then owns the port until dropped
//!     let mut session = UploadSession::connect(port, SystemClock)?;
//!     session.run(image.data(), |p| {
//!         println!("{}/{} bytes", p.sent, p.total);
//!     })?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod clock;
pub mod error;
pub mod image;
pub mod link;
pub mod port;
pub mod protocol;
pub mod receiver;
pub mod session;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker polled by waiting loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Only the first
/// registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    clock::{Clock, SystemClock},
    error::{Error, Phase, Result},
    image::FirmwareImage,
    link::reset_device,
    port::{DEFAULT_BAUD, Port, SerialConfig},
    protocol::{AckFrame, Command, CommandFrame, crc16_xmodem},
    receiver::{AckOutcome, ReceiveBuffer, describe_received, wait_for_ack},
    session::{
        CHUNK_SIZE, Progress, SessionState, SessionTimeouts, UploadReport, UploadSession,
    },
};
