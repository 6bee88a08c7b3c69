//! Outbound command frames.
//!
//! ## Frame Format
//!
//! ```text
//! +--------+-----+--------+----------+-----------+--------+
//! | Magic  | CMD | Length | Reserved |  Payload  | CRC16  |
//! +--------+-----+--------+----------+-----------+--------+
//! | 2 bytes| 1   | 2 bytes| 9 bytes  |  N bytes  | 2 bytes|
//! +--------+-----+--------+----------+-----------+--------+
//! | 0xABCD | cmd |   N    |  zeros   |  payload  | CRC    |
//! +--------+-----+--------+----------+-----------+--------+
//! ```
//!
//! Multi-byte fields are big-endian. The CRC covers magic through payload.

use crate::error::{Error, Result};
use crate::protocol::crc::crc16_xmodem;
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

/// Frame magic header.
pub const FRAME_MAGIC: u16 = 0xABCD;

/// Size of the zero-filled reserved field.
pub const RESERVED_LEN: usize = 9;

/// Bytes before the payload: magic(2) + cmd(1) + len(2) + reserved(9).
pub const HEADER_LEN: usize = 2 + 1 + 2 + RESERVED_LEN;

/// Trailing CRC16 size.
pub const CRC_LEN: usize = 2;

/// Largest payload the length field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// OTA command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Command {
    /// Begin an update; payload is the image size (u32, big-endian).
    Start = 0x01,
    /// One chunk of image data.
    Data = 0x02,
    /// Finalize the update.
    End = 0x03,
    /// Ping / verify; used as the handshake.
    Verify = 0x04,
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::Start),
            0x02 => Ok(Self::Data),
            0x03 => Ok(Self::End),
            0x04 => Ok(Self::Verify),
            other => Err(Error::Protocol(format!("unknown command 0x{other:02X}"))),
        }
    }
}

/// Command frame builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    cmd: Command,
    payload: Vec<u8>,
}

impl CommandFrame {
    /// Create a frame, rejecting payloads the length field cannot hold.
    pub fn new(cmd: Command, payload: impl Into<Vec<u8>>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge(payload.len()));
        }
        Ok(Self { cmd, payload })
    }

    /// Create a VERIFY (ping) frame.
    pub fn verify() -> Self {
        Self {
            cmd: Command::Verify,
            payload: Vec::new(),
        }
    }

    /// Create a START frame announcing `image_size` bytes.
    pub fn start(image_size: u32) -> Self {
        Self {
            cmd: Command::Start,
            payload: image_size.to_be_bytes().to_vec(),
        }
    }

    /// Create a DATA frame carrying one chunk.
    pub fn data(chunk: &[u8]) -> Result<Self> {
        Self::new(Command::Data, chunk)
    }

    /// Create an END frame.
    pub fn end() -> Self {
        Self {
            cmd: Command::End,
            payload: Vec::new(),
        }
    }

    /// Build the complete frame data.
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());

        buf.write_u16::<BigEndian>(FRAME_MAGIC).unwrap();
        buf.push(self.cmd as u8);
        // Length checked in the constructors
        buf.write_u16::<BigEndian>(self.payload.len() as u16)
            .unwrap();
        buf.extend_from_slice(&[0u8; RESERVED_LEN]);
        buf.extend_from_slice(&self.payload);

        let crc = crc16_xmodem(&buf);
        buf.write_u16::<BigEndian>(crc).unwrap();

        buf
    }

    /// Parse a complete frame, as the device would.
    ///
    /// `data` must start at the magic header. Trailing bytes after the CRC
    /// are ignored.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN + CRC_LEN {
            return Err(Error::Protocol(format!(
                "frame too short: {} bytes",
                data.len()
            )));
        }
        let magic = BigEndian::read_u16(&data[0..2]);
        if magic != FRAME_MAGIC {
            return Err(Error::Protocol(format!("bad magic 0x{magic:04X}")));
        }

        let len = usize::from(BigEndian::read_u16(&data[3..5]));
        let total = HEADER_LEN + len + CRC_LEN;
        if data.len() < total {
            return Err(Error::Protocol(format!(
                "truncated frame: need {total} bytes, have {}",
                data.len()
            )));
        }

        let expected = BigEndian::read_u16(&data[total - CRC_LEN..total]);
        let actual = crc16_xmodem(&data[..total - CRC_LEN]);
        if expected != actual {
            return Err(Error::Protocol(format!(
                "CRC mismatch: frame says {expected:04X}, computed {actual:04X}"
            )));
        }

        Ok(Self {
            cmd: Command::try_from(data[2])?,
            payload: data[HEADER_LEN..HEADER_LEN + len].to_vec(),
        })
    }

    /// Total encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len() + CRC_LEN
    }

    /// Get the command type.
    pub fn command(&self) -> Command {
        self.cmd
    }

    /// Get the payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}
