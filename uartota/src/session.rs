//! Upload session: handshake, then START / DATA x N / END.
//!
//! ```text
//! Idle -> Syncing -> Starting -> Transferring -> Ending -> Succeeded
//!            |           |            |             |
//!            +-----------+------------+-------------+---> Failed
//! ```
//!
//! Every step waits for one acknowledgment. Status 0 moves on; a non-zero
//! status or a timeout fails the session. Only the handshake is retried, and
//! only on timeout. A failed session cannot be resumed; open a new one.
//!
//! ## Example
//!
//! ```rust,no_run
//! use uartota::{NativePort, SerialConfig, SystemClock, UploadSession};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = std::fs::read("firmware.bin")?;
//!     let port = NativePort::open(&SerialConfig::new("/dev/ttyUSB0", 2_000_000))?;
//!
//!     let mut session = UploadSession::connect(port, SystemClock)?;
//!     let report = session.run(&image, |p| println!("{}%", p.percent()))?;
//!     println!("device says: {}", report.end_message);
//!     Ok(())
//! }
//! ```

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Phase, Result};
use crate::link::reset_device;
use crate::port::Port;
use crate::protocol::{AckFrame, CommandFrame};
use crate::receiver::{AckOutcome, describe_received, wait_for_ack};
use log::{debug, info, warn};
use std::time::Duration;

/// Bytes of image data per DATA frame.
pub const CHUNK_SIZE: usize = 4096;

/// Per-step acknowledgment timeouts and handshake retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Wait for each VERIFY acknowledgment.
    pub sync: Duration,
    /// Wait for START; the device erases its update partition first.
    pub start: Duration,
    /// Wait for each DATA acknowledgment.
    pub data: Duration,
    /// Wait for END; the device verifies and switches partitions.
    pub end: Duration,
    /// VERIFY attempts before giving up.
    pub sync_attempts: u32,
    /// Pause between VERIFY attempts.
    pub sync_retry_delay: Duration,
    /// Pause between a successful handshake and START.
    pub post_sync_delay: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            sync: Duration::from_secs(1),
            start: Duration::from_secs(10),
            data: Duration::from_secs(1),
            end: Duration::from_secs(5),
            sync_attempts: 3,
            sync_retry_delay: Duration::from_millis(500),
            post_sync_delay: Duration::from_millis(500),
        }
    }
}

/// Where the session is in the upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected and reset, nothing sent yet.
    Idle,
    /// Sending VERIFY pings.
    Syncing,
    /// START sent, waiting for the device to prepare storage.
    Starting,
    /// Sending DATA chunks.
    Transferring,
    /// END sent, waiting for finalization.
    Ending,
    /// Device accepted the whole image.
    Succeeded,
    /// A step failed; the session is finished.
    Failed,
}

impl SessionState {
    /// Whether the session can no longer make progress.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Upload progress after an acknowledged chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes acknowledged so far.
    pub sent: usize,
    /// Image size.
    pub total: usize,
    /// Chunks acknowledged so far.
    pub chunks_done: usize,
    /// Chunks in the image.
    pub chunks_total: usize,
}

impl Progress {
    /// Whole percent acknowledged, rounded down; 100 only when complete.
    #[allow(clippy::cast_possible_truncation)]
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (self.sent as u64 * 100 / self.total as u64) as u8
    }
}

/// Summary of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    /// Image bytes sent and acknowledged.
    pub bytes_sent: usize,
    /// DATA frames sent.
    pub chunks: usize,
    /// Message from the handshake acknowledgment.
    pub sync_message: String,
    /// Message from the END acknowledgment.
    pub end_message: String,
}

/// Number of DATA frames needed for `size` bytes.
pub fn chunk_count(size: usize) -> usize {
    size.div_ceil(CHUNK_SIZE)
}

/// One upload over an exclusively owned port.
///
/// The port is closed when the session is closed or dropped, whatever the
/// outcome.
pub struct UploadSession<P: Port, C: Clock = SystemClock> {
    port: P,
    clock: C,
    timeouts: SessionTimeouts,
    state: SessionState,
    hello: Option<AckFrame>,
}

impl<P: Port, C: Clock> UploadSession<P, C> {
    /// Take ownership of an open port and reset the device.
    ///
    /// If the reset fails the port is closed before the error is returned.
    pub fn connect(port: P, clock: C) -> Result<Self> {
        let mut session = Self {
            port,
            clock,
            timeouts: SessionTimeouts::default(),
            state: SessionState::Idle,
            hello: None,
        };
        reset_device(&mut session.port, &session.clock)?;
        Ok(session)
    }

    /// Override the default timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: SessionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Timeouts in use.
    pub fn timeouts(&self) -> &SessionTimeouts {
        &self.timeouts
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Handshake with the device.
    ///
    /// Any acknowledgment, even one with an error status, proves the device
    /// is listening and is returned as success.
    pub fn sync(&mut self) -> Result<AckFrame> {
        self.ensure_state(SessionState::Idle)?;
        match self.handshake() {
            Ok(ack) => {
                self.hello = Some(ack.clone());
                Ok(ack)
            },
            Err(e) => {
                self.state = SessionState::Failed;
                Err(e)
            },
        }
    }

    /// Run the whole upload of `image`, calling `progress` after each chunk.
    ///
    /// Performs the handshake first unless [`sync`](Self::sync) already
    /// succeeded on this session.
    pub fn run<F>(&mut self, image: &[u8], progress: F) -> Result<UploadReport>
    where
        F: FnMut(Progress),
    {
        if image.is_empty() {
            return Err(Error::EmptyImage);
        }
        let size = u32::try_from(image.len()).map_err(|_| Error::ImageTooLarge(image.len() as u64))?;

        let sync_message = match self.state {
            SessionState::Idle => self.sync()?.message,
            // Handshake done by an earlier sync() call
            SessionState::Syncing => self
                .hello
                .as_ref()
                .map(|ack| ack.message.clone())
                .unwrap_or_default(),
            other => {
                return Err(Error::Protocol(format!(
                    "cannot start upload in state {other:?}"
                )));
            },
        };

        let result = self.transfer(image, size, progress);
        self.state = match result {
            Ok(_) => SessionState::Succeeded,
            Err(_) => SessionState::Failed,
        };

        let (chunks, end_message) = result?;
        info!("Upload complete: {end_message}");
        Ok(UploadReport {
            bytes_sent: image.len(),
            chunks,
            sync_message,
            end_message,
        })
    }

    /// Close the port.
    pub fn close(mut self) -> Result<()> {
        self.port.close()
    }

    fn ensure_state(&self, expected: SessionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "expected state {expected:?}, session is {:?}",
                self.state
            )))
        }
    }

    fn handshake(&mut self) -> Result<AckFrame> {
        self.state = SessionState::Syncing;
        info!("Syncing with device...");

        let attempts = self.timeouts.sync_attempts;
        for attempt in 1..=attempts {
            match self.exchange(&CommandFrame::verify(), Phase::Sync, self.timeouts.sync) {
                Ok(ack) => {
                    if ack.is_success() {
                        info!("Sync OK: {}", ack.message);
                    } else {
                        warn!(
                            "Device is responding but reported error {}: {}",
                            ack.status, ack.message
                        );
                    }
                    return Ok(ack);
                },
                Err(e) if e.is_retryable() => {
                    warn!("Sync attempt {attempt}/{attempts} timed out");
                    if attempt < attempts {
                        self.clock.sleep(self.timeouts.sync_retry_delay);
                    }
                },
                Err(e) => return Err(e),
            }
        }

        Err(Error::HandshakeFailed { attempts })
    }

    fn transfer<F>(&mut self, image: &[u8], size: u32, mut progress: F) -> Result<(usize, String)>
    where
        F: FnMut(Progress),
    {
        self.clock.sleep(self.timeouts.post_sync_delay);

        self.state = SessionState::Starting;
        info!("Sending START ({size} bytes)...");
        let ack = self.exchange(&CommandFrame::start(size), Phase::Start, self.timeouts.start)?;
        let ack = expect_success(ack, Phase::Start)?;
        info!("START accepted: {}", ack.message);

        self.state = SessionState::Transferring;
        let total = image.len();
        let chunks_total = chunk_count(total);
        let mut sent = 0usize;
        for (index, chunk) in image.chunks(CHUNK_SIZE).enumerate() {
            let phase = Phase::Data { chunk: index };
            let frame = CommandFrame::data(chunk)?;
            let ack = self.exchange(&frame, phase, self.timeouts.data)?;
            expect_success(ack, phase)?;

            sent += chunk.len();
            progress(Progress {
                sent,
                total,
                chunks_done: index + 1,
                chunks_total,
            });
        }
        debug!("All {chunks_total} chunks acknowledged");

        self.state = SessionState::Ending;
        info!("Sending END...");
        let ack = self.exchange(&CommandFrame::end(), Phase::End, self.timeouts.end)?;
        let ack = expect_success(ack, Phase::End)?;

        Ok((chunks_total, ack.message))
    }

    /// Send one frame and wait for its acknowledgment.
    fn exchange(&mut self, frame: &CommandFrame, phase: Phase, timeout: Duration) -> Result<AckFrame> {
        let data = frame.build();
        debug!(
            "Sending {:?}: {} bytes payload, {} bytes total",
            frame.command(),
            frame.payload().len(),
            data.len()
        );
        self.port.write_all_bytes(&data)?;

        match wait_for_ack(&mut self.port, &self.clock, timeout)? {
            AckOutcome::Received { ack, discarded } => {
                if discarded > 0 {
                    debug!("Skipped {discarded} bytes of noise before {phase} ack");
                }
                Ok(ack)
            },
            AckOutcome::TimedOut { received } => {
                if !received.is_empty() {
                    info!("Device output: {}", describe_received(&received));
                }
                Err(Error::Timeout { phase, received })
            },
        }
    }
}

impl<P: Port, C: Clock> Drop for UploadSession<P, C> {
    fn drop(&mut self) {
        let _ = self.port.close();
    }
}

fn expect_success(ack: AckFrame, phase: Phase) -> Result<AckFrame> {
    if ack.is_success() {
        Ok(ack)
    } else {
        Err(Error::Device {
            phase,
            status: ack.status,
            message: ack.message,
        })
    }
}
