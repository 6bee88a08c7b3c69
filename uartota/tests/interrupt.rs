//! Interruption through the global checker.
//!
//! Lives in its own test binary because the checker can only be set once
//! per process.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use uartota::{Error, Port, SystemClock, wait_for_ack};

/// A device that never answers.
struct SilentPort;

impl Read for SilentPort {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(0)
    }
}

impl Write for SilentPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for SilentPort {
    fn name(&self) -> &str {
        "silent"
    }

    fn bytes_to_read(&self) -> uartota::Result<usize> {
        Ok(0)
    }

    fn set_dtr(&mut self, _level: bool) -> uartota::Result<()> {
        Ok(())
    }

    fn set_rts(&mut self, _level: bool) -> uartota::Result<()> {
        Ok(())
    }

    fn clear_input(&mut self) -> uartota::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> uartota::Result<()> {
        Ok(())
    }
}

#[test]
fn interrupt_stops_ack_wait() {
    uartota::set_interrupt_checker(|| true);
    assert!(uartota::is_interrupted_requested());

    let started = Instant::now();
    let result = wait_for_ack(&mut SilentPort, &SystemClock, Duration::from_secs(10));

    assert!(matches!(result, Err(Error::Interrupted)));
    assert!(started.elapsed() < Duration::from_secs(5));
}
