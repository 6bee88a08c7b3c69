//! Acknowledgment resynchronization.
//!
//! The device shares its UART between the OTA receiver and its console, so
//! acknowledgments arrive interleaved with boot logs and debug prints. The
//! receiver accumulates whatever the port delivers, drops everything in front
//! of the first [`ACK_MARKER`], and only hands out frames that pass the CRC
//! check. A CRC failure is treated as a false marker match: the two marker
//! bytes are skipped and scanning resumes inside the same deadline.

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::ack::{ACK_MARKER, AckDecode, AckFrame, decode_ack, find_marker};
use log::{debug, trace, warn};
use std::time::{Duration, Instant};

/// Sleep between polls of the port while waiting.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Bytes accumulated during one acknowledgment wait.
///
/// Only ever holds a contiguous suffix of what was received: bytes are
/// appended at the back and dropped from the front.
#[derive(Debug, Default)]
pub struct ReceiveBuffer {
    data: Vec<u8>,
    discarded: usize,
    crc_failures: usize,
}

impl ReceiveBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Bytes not consumed yet.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Bytes dropped so far without yielding a frame.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Frames rejected by the CRC check so far.
    pub fn crc_failures(&self) -> usize {
        self.crc_failures
    }

    /// Extract the next valid acknowledgment, if a complete one is buffered.
    ///
    /// Returns `None` when more bytes are needed. The frame's bytes are
    /// removed from the buffer; anything after it stays.
    pub fn next_ack(&mut self) -> Option<AckFrame> {
        loop {
            let pos = find_marker(&self.data)?;
            if pos > 0 {
                debug!(
                    "Discarding {pos} bytes before ack: {}",
                    String::from_utf8_lossy(&self.data[..pos]).escape_debug()
                );
                self.drop_front(pos);
            }

            match decode_ack(&self.data) {
                AckDecode::Incomplete => return None,
                AckDecode::Frame { ack, len } => {
                    self.data.drain(..len);
                    return Some(ack);
                },
                AckDecode::CrcMismatch { received, computed } => {
                    warn!("Ack CRC mismatch: received {received:04X}, computed {computed:04X}");
                    self.crc_failures += 1;
                    self.drop_front(ACK_MARKER.len());
                },
            }
        }
    }

    fn drop_front(&mut self, n: usize) {
        self.data.drain(..n);
        self.discarded += n;
    }
}

/// Result of waiting for an acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// A frame passed the CRC check.
    Received {
        /// The acknowledgment.
        ack: AckFrame,
        /// Bytes skipped before it (noise and rejected frames).
        discarded: usize,
    },
    /// The deadline passed without a valid frame.
    TimedOut {
        /// Every byte read during the wait.
        received: Vec<u8>,
    },
}

/// Wait up to `timeout` for the next valid acknowledgment.
///
/// The deadline is measured from the call, no matter how much noise is
/// skipped. Returns as soon as one frame validates.
pub fn wait_for_ack<P, C>(port: &mut P, clock: &C, timeout: Duration) -> Result<AckOutcome>
where
    P: Port + ?Sized,
    C: Clock + ?Sized,
{
    let start: Instant = clock.now();
    let mut buffer = ReceiveBuffer::new();
    let mut raw = Vec::new();
    let mut chunk = Vec::new();

    loop {
        if crate::is_interrupted_requested() {
            return Err(Error::Interrupted);
        }

        chunk.clear();
        if port.read_available(&mut chunk)? > 0 {
            trace!("RX {} bytes: {:02X?}", chunk.len(), chunk);
            buffer.extend(&chunk);
            raw.extend_from_slice(&chunk);

            if let Some(ack) = buffer.next_ack() {
                debug!(
                    "Ack status={} message={:?} after {} ms",
                    ack.status,
                    ack.message,
                    clock.elapsed(start).as_millis()
                );
                if !buffer.as_bytes().is_empty() {
                    trace!("Dropping {} bytes after ack", buffer.as_bytes().len());
                }
                return Ok(AckOutcome::Received {
                    ack,
                    discarded: buffer.discarded(),
                });
            }
        }

        if clock.elapsed(start) >= timeout {
            break;
        }
        clock.sleep(POLL_INTERVAL);
    }

    debug!(
        "No ack within {} ms ({} bytes received, {} CRC failures)",
        timeout.as_millis(),
        raw.len(),
        buffer.crc_failures()
    );
    Ok(AckOutcome::TimedOut { received: raw })
}

/// Render raw device output for humans.
///
/// Mostly printable data is shown as lossy UTF-8 text, anything else as hex.
pub fn describe_received(bytes: &[u8]) -> String {
    let printable = bytes
        .iter()
        .filter(|b| b.is_ascii_graphic() || b.is_ascii_whitespace() || **b >= 0x80)
        .count();
    if printable * 10 >= bytes.len() * 9 {
        String::from_utf8_lossy(bytes)
            .trim_end()
            .to_string()
    } else {
        bytes
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::port::mock::{MockPort, ack};

    fn corrupt_crc(mut frame: Vec<u8>, bit: u8) -> Vec<u8> {
        let last = frame.len() - 1;
        frame[last] ^= 1 << bit;
        frame
    }

    #[test]
    fn test_buffer_plain_frame() {
        let mut buf = ReceiveBuffer::new();
        buf.extend(&ack(0, "OK"));

        assert_eq!(buf.next_ack(), Some(AckFrame::new(0, "OK")));
        assert_eq!(buf.discarded(), 0);
        assert!(buf.as_bytes().is_empty());
    }

    #[test]
    fn test_buffer_garbage_prefix_counted() {
        let garbage = b"I (312) boot: ESP-IDF v5.1 2nd stage bootloader\r\n";
        let mut buf = ReceiveBuffer::new();
        buf.extend(garbage);
        buf.extend(&ack(0, "ready"));

        assert_eq!(buf.next_ack(), Some(AckFrame::new(0, "ready")));
        assert_eq!(buf.discarded(), garbage.len());
    }

    #[test]
    fn test_buffer_garbage_ending_in_marker_byte() {
        let mut buf = ReceiveBuffer::new();
        buf.extend(&[0x00, 0xAA, 0xAA]);
        buf.extend(&ack(4, "bad image"));

        assert_eq!(buf.next_ack(), Some(AckFrame::new(4, "bad image")));
        assert_eq!(buf.discarded(), 3);
    }

    #[test]
    fn test_buffer_waits_for_complete_frame() {
        let frame = ack(0, "partial");
        let mut buf = ReceiveBuffer::new();

        for (i, byte) in frame.iter().enumerate() {
            assert_eq!(buf.next_ack(), None, "frame returned early at byte {i}");
            buf.extend(&[*byte]);
        }
        assert_eq!(buf.next_ack(), Some(AckFrame::new(0, "partial")));
    }

    #[test]
    fn test_buffer_skips_false_marker() {
        // Looks like a header with a 2-byte message but the CRC is wrong
        let mut buf = ReceiveBuffer::new();
        buf.extend(&[0xAA, 0x55, 0x00, 0x02, b'h', b'i', 0x12, 0x34]);
        buf.extend(&ack(0, "OK"));

        assert_eq!(buf.next_ack(), Some(AckFrame::new(0, "OK")));
        assert_eq!(buf.crc_failures(), 1);
        assert_eq!(buf.discarded(), 8);
    }

    #[test]
    fn test_buffer_keeps_trailing_bytes() {
        let mut buf = ReceiveBuffer::new();
        buf.extend(&ack(0, "one"));
        buf.extend(&ack(1, "two"));

        assert_eq!(buf.next_ack(), Some(AckFrame::new(0, "one")));
        assert_eq!(buf.next_ack(), Some(AckFrame::new(1, "two")));
        assert_eq!(buf.next_ack(), None);
    }

    #[test]
    fn test_wait_round_trip() {
        let mut port = MockPort::new();
        port.push_rx(&ack(0, "OK"));
        let clock = MockClock::new();

        let outcome = wait_for_ack(&mut port, &clock, Duration::from_secs(1)).unwrap();
        assert_eq!(
            outcome,
            AckOutcome::Received {
                ack: AckFrame::new(0, "OK"),
                discarded: 0,
            }
        );
    }

    #[test]
    fn test_wait_returns_early() {
        let mut port = MockPort::new();
        port.push_rx(&ack(0, "OK"));
        let clock = MockClock::new();

        wait_for_ack(&mut port, &clock, Duration::from_secs(10)).unwrap();
        assert!(clock.total() < Duration::from_millis(10));
    }

    #[test]
    fn test_wait_reports_garbage_length() {
        for n in [1usize, 7, 300] {
            let garbage: Vec<u8> = (0..n).map(|i| b'a' + (i % 26) as u8).collect();
            let mut port = MockPort::new();
            port.push_rx(&garbage);
            port.push_rx(&ack(0, "OK"));
            let clock = MockClock::new();

            match wait_for_ack(&mut port, &clock, Duration::from_secs(1)).unwrap() {
                AckOutcome::Received { ack, discarded } => {
                    assert_eq!(ack, AckFrame::new(0, "OK"));
                    assert_eq!(discarded, n);
                },
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_wait_handles_dribbled_bytes() {
        let mut port = MockPort::new().with_max_read(3);
        port.push_rx(b"log line\r\n");
        port.push_rx(&ack(2, "flash write error"));
        let clock = MockClock::new();

        match wait_for_ack(&mut port, &clock, Duration::from_secs(1)).unwrap() {
            AckOutcome::Received { ack, discarded } => {
                assert_eq!(ack, AckFrame::new(2, "flash write error"));
                assert_eq!(discarded, 10);
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_wait_corrupt_crc_times_out() {
        let valid = ack(0, "OK");
        for bit in 0..8 {
            let mut port = MockPort::new();
            port.push_rx(&corrupt_crc(valid.clone(), bit));
            let clock = MockClock::new();

            let outcome = wait_for_ack(&mut port, &clock, Duration::from_millis(200)).unwrap();
            match outcome {
                AckOutcome::TimedOut { received } => assert_eq!(received.len(), valid.len()),
                other => panic!("corrupt frame accepted: {other:?}"),
            }
            assert!(clock.total() >= Duration::from_millis(200));
        }
    }

    #[test]
    fn test_wait_corrupt_then_valid() {
        let mut port = MockPort::new();
        port.push_rx(&corrupt_crc(ack(0, "first"), 3));
        port.push_rx(&ack(0, "second"));
        let clock = MockClock::new();

        match wait_for_ack(&mut port, &clock, Duration::from_secs(1)).unwrap() {
            AckOutcome::Received { ack, .. } => assert_eq!(ack.message, "second"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_wait_timeout_keeps_raw_bytes() {
        let mut port = MockPort::new();
        port.push_rx(b"Guru Meditation Error");
        let clock = MockClock::new();

        let outcome = wait_for_ack(&mut port, &clock, Duration::from_millis(50)).unwrap();
        assert_eq!(
            outcome,
            AckOutcome::TimedOut {
                received: b"Guru Meditation Error".to_vec(),
            }
        );
    }

    #[test]
    fn test_wait_transport_error_propagates() {
        let mut port = MockPort::new();
        port.close().unwrap();
        let clock = MockClock::new();

        assert!(wait_for_ack(&mut port, &clock, Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_describe_received() {
        assert_eq!(describe_received(b"rst:0x1 (POWERON)\r\n"), "rst:0x1 (POWERON)");
        assert_eq!(describe_received(&[0x00, 0x01, 0xFE]), "00 01 FE");
    }
}
