//! Inbound acknowledgment frames.
//!
//! ## Frame Format
//!
//! ```text
//! +--------+--------+-------+-----------+--------+
//! | Marker | Status | MsgLen|  Message  | CRC16  |
//! +--------+--------+-------+-----------+--------+
//! | 2 bytes| 1      | 1     |  N bytes  | 2 bytes|
//! +--------+--------+-------+-----------+--------+
//! | AA 55  | 0 = ok |   N   |  UTF-8    | CRC    |
//! +--------+--------+-------+-----------+--------+
//! ```
//!
//! The CRC (big-endian) covers marker through message.

use crate::error::{Error, Result};
use crate::protocol::crc::crc16_xmodem;

/// Acknowledgment marker.
pub const ACK_MARKER: [u8; 2] = [0xAA, 0x55];

/// Marker + status + message length.
pub const ACK_HEADER_LEN: usize = 4;

/// Trailing CRC16 size.
pub const ACK_CRC_LEN: usize = 2;

/// Status reported for a successful step.
pub const STATUS_OK: u8 = 0;

/// A validated acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AckFrame {
    /// 0 on success, otherwise a device-defined error code.
    pub status: u8,
    /// Device message, lossily decoded as UTF-8.
    pub message: String,
}

impl AckFrame {
    /// Create an acknowledgment.
    pub fn new(status: u8, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Check if the device reported success.
    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Encode the frame as the device sends it.
    #[allow(clippy::cast_possible_truncation)]
    pub fn build(&self) -> Result<Vec<u8>> {
        let message = self.message.as_bytes();
        if message.len() > usize::from(u8::MAX) {
            return Err(Error::Protocol(format!(
                "ack message too long: {} bytes",
                message.len()
            )));
        }

        let mut buf = Vec::with_capacity(ack_frame_len(message.len()));
        buf.extend_from_slice(&ACK_MARKER);
        buf.push(self.status);
        buf.push(message.len() as u8);
        buf.extend_from_slice(message);
        let crc = crc16_xmodem(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());
        Ok(buf)
    }
}

/// Outcome of decoding a window that starts at [`ACK_MARKER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckDecode {
    /// More bytes are needed before the frame can be checked.
    Incomplete,
    /// A frame passed the CRC check and spans `len` bytes.
    Frame {
        /// Decoded acknowledgment.
        ack: AckFrame,
        /// Bytes consumed from the window.
        len: usize,
    },
    /// The declared frame is complete but its CRC does not match.
    CrcMismatch {
        /// CRC carried by the frame.
        received: u16,
        /// CRC computed over the frame.
        computed: u16,
    },
}

/// Full frame length for a message of `message_len` bytes.
pub fn ack_frame_len(message_len: usize) -> usize {
    ACK_HEADER_LEN + message_len + ACK_CRC_LEN
}

/// Decode an acknowledgment from a window starting at the marker.
///
/// The total length comes from the message-length field, so nothing is
/// sliced until the whole frame is present.
pub fn decode_ack(window: &[u8]) -> AckDecode {
    debug_assert!(window.starts_with(&ACK_MARKER) || window.len() < ACK_MARKER.len());

    if window.len() < ACK_HEADER_LEN {
        return AckDecode::Incomplete;
    }

    let status = window[2];
    let msg_len = usize::from(window[3]);
    let total = ack_frame_len(msg_len);
    if window.len() < total {
        return AckDecode::Incomplete;
    }

    let body = &window[..total - ACK_CRC_LEN];
    let received = u16::from_be_bytes([window[total - 2], window[total - 1]]);
    let computed = crc16_xmodem(body);
    if received != computed {
        return AckDecode::CrcMismatch { received, computed };
    }

    let message = String::from_utf8_lossy(&body[ACK_HEADER_LEN..]).into_owned();
    AckDecode::Frame {
        ack: AckFrame { status, message },
        len: total,
    }
}

/// Find the first acknowledgment marker in `data`.
pub fn find_marker(data: &[u8]) -> Option<usize> {
    data.windows(ACK_MARKER.len())
        .position(|w| w == ACK_MARKER)
}
