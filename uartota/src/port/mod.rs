//! Port abstraction for the serial link.
//!
//! The protocol layer only needs a byte stream with a non-blocking "how much
//! is waiting" query and two control lines, so it is written against the
//! `Port` trait and never touches `serialport` directly.
//!
//! ```text
//! +------------------------------+
//! |  UploadSession / reset_device|
//! +--------------+---------------+
//!                |
//!                v
//! +--------------+---------------+
//! |          Port trait          |
//! +--------------+---------------+
//!                |
//!                v
//! +--------------+---------------+
//! |  NativePort (serialport)     |
//! +------------------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use uartota::port::Port;
//!
//! fn drain<P: Port>(port: &mut P) -> uartota::Result<Vec<u8>> {
//!     let mut buf = Vec::new();
//!     port.read_available(&mut buf)?;
//!     Ok(buf)
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Default link speed used by the device's OTA receiver.
pub const DEFAULT_BAUD: u32 = 2_000_000;

/// Default per-read timeout. Reads are polled, so this only bounds a single
/// `read` call.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Serial port configuration.
///
/// The framing is always 8 data bits, no parity, 1 stop bit and no flow
/// control; only the address, speed and read timeout vary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout for a single read call.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Byte-stream transport with two control lines.
///
/// The reset line is wired to RTS and the boot-mode line to DTR, as on the
/// usual USB-UART auto-program circuit.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Number of bytes that can be read without blocking.
    fn bytes_to_read(&self) -> Result<usize>;

    /// Set DTR (boot-mode line) state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set RTS (reset line) state.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Discard everything received but not yet read.
    fn clear_input(&mut self) -> Result<()>;

    /// Close the port and release resources.
    ///
    /// Safe to call more than once; later calls do nothing.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes and flush.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }

    /// Append whatever is already waiting to `buf` without blocking.
    ///
    /// Returns the number of bytes appended.
    fn read_available(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let waiting = self.bytes_to_read()?;
        if waiting == 0 {
            return Ok(0);
        }

        let start = buf.len();
        buf.resize(start + waiting, 0);
        match self.read(&mut buf[start..]) {
            Ok(n) => {
                buf.truncate(start + n);
                Ok(n)
            },
            Err(e) if e.kind() == ErrorKind::TimedOut => {
                buf.truncate(start);
                Ok(0)
            },
            Err(e) => {
                buf.truncate(start);
                Err(e.into())
            },
        }
    }
}

#[cfg(feature = "native")]
pub use native::NativePort;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 2_000_000);
        assert_eq!(config.timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0", 921600).with_timeout(Duration::from_secs(5));

        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 921600);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_read_available_appends() {
        let mut port = MockPort::new();
        port.push_rx(b"abc");

        let mut buf = b"x".to_vec();
        assert_eq!(port.read_available(&mut buf).unwrap(), 3);
        assert_eq!(buf, b"xabc");
        assert_eq!(port.read_available(&mut buf).unwrap(), 0);
        assert_eq!(buf, b"xabc");
    }

    #[test]
    fn test_read_available_respects_partial_reads() {
        let mut port = MockPort::new().with_max_read(2);
        port.push_rx(b"abcde");

        let mut buf = Vec::new();
        assert_eq!(port.read_available(&mut buf).unwrap(), 2);
        assert_eq!(port.read_available(&mut buf).unwrap(), 2);
        assert_eq!(port.read_available(&mut buf).unwrap(), 1);
        assert_eq!(buf, b"abcde");
    }
}
