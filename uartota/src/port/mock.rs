//! Scripted in-memory port acting as a simulated device.

use std::collections::VecDeque;
use std::io::{Error as IoError, ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;
use crate::port::Port;
use crate::protocol::{AckFrame, CommandFrame};

/// Control-line and buffer operations, in call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineEvent {
    Dtr(bool),
    Rts(bool),
    ClearInput,
    Close,
}

/// Produces the bytes the device sends back for one received frame.
pub(crate) type Responder = Box<dyn FnMut(&CommandFrame) -> Vec<u8> + Send>;

pub(crate) struct MockPort {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    frames: Vec<CommandFrame>,
    events: Vec<LineEvent>,
    responder: Option<Responder>,
    boot_log: Vec<u8>,
    max_read: usize,
    closed: Arc<AtomicBool>,
}

impl MockPort {
    pub(crate) fn new() -> Self {
        Self {
            rx: VecDeque::new(),
            tx: Vec::new(),
            frames: Vec::new(),
            events: Vec::new(),
            responder: None,
            boot_log: Vec::new(),
            max_read: usize::MAX,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Device that answers every frame through `responder`.
    pub(crate) fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&CommandFrame) -> Vec<u8> + Send + 'static,
    {
        let mut port = Self::new();
        port.responder = Some(Box::new(responder));
        port
    }

    /// Device that acknowledges every frame with status 0.
    pub(crate) fn accepting() -> Self {
        Self::with_responder(|_| ack(0, "OK"))
    }

    /// Bytes emitted when the reset line is released.
    pub(crate) fn with_boot_log(mut self, log: &[u8]) -> Self {
        self.boot_log = log.to_vec();
        self
    }

    /// Cap every read (and `bytes_to_read`) at `max` bytes.
    pub(crate) fn with_max_read(mut self, max: usize) -> Self {
        self.max_read = max;
        self
    }

    pub(crate) fn push_rx(&mut self, data: &[u8]) {
        self.rx.extend(data.iter().copied());
    }

    pub(crate) fn frames(&self) -> &[CommandFrame] {
        &self.frames
    }

    pub(crate) fn events(&self) -> &[LineEvent] {
        &self.events
    }

    /// Shared flag that stays readable after the port is moved or dropped.
    pub(crate) fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    pub(crate) fn pending_rx(&self) -> usize {
        self.rx.len()
    }

    fn check_open(&self) -> std::io::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(IoError::new(ErrorKind::NotConnected, "port closed"))
        } else {
            Ok(())
        }
    }

    fn deliver_frames(&mut self) {
        while !self.tx.is_empty() {
            let Ok(frame) = CommandFrame::parse(&self.tx) else {
                break;
            };
            self.tx.drain(..frame.encoded_len());
            if let Some(responder) = self.responder.as_mut() {
                let reply = responder(&frame);
                self.rx.extend(reply);
            }
            self.frames.push(frame);
        }
    }
}

/// Encoded acknowledgment, for use in responders.
pub(crate) fn ack(status: u8, message: &str) -> Vec<u8> {
    AckFrame::new(status, message)
        .build()
        .unwrap()
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.check_open()?;
        if self.rx.is_empty() {
            return Err(IoError::new(ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.rx.len()).min(self.max_read);
        for b in buf.iter_mut().take(n) {
            *b = self.rx.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.check_open()?;
        self.tx.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.check_open()?;
        self.deliver_frames();
        Ok(())
    }
}

impl Port for MockPort {
    fn name(&self) -> &str {
        "mock"
    }

    fn bytes_to_read(&self) -> Result<usize> {
        self.check_open()?;
        Ok(self.rx.len().min(self.max_read))
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.check_open()?;
        self.events.push(LineEvent::Dtr(level));
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.check_open()?;
        let releasing = !level && self.events.last() == Some(&LineEvent::Rts(true));
        self.events.push(LineEvent::Rts(level));
        if releasing {
            let log = self.boot_log.clone();
            self.rx.extend(log);
        }
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.check_open()?;
        self.events.push(LineEvent::ClearInput);
        self.rx.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.events.push(LineEvent::Close);
        }
        Ok(())
    }
}
