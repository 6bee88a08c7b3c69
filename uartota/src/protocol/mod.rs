//! Wire protocol: checksum, command frames and acknowledgment frames.

pub mod ack;
pub mod crc;
pub mod frame;

// Re-export common types
pub use ack::{ACK_MARKER, AckDecode, AckFrame, decode_ack};
pub use crc::crc16_xmodem;
pub use frame::{Command, CommandFrame, FRAME_MAGIC};
