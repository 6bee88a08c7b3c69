//! Hardware reset through the serial control lines.
//!
//! RTS drives the enable (reset) pin and DTR the boot-mode pin through the
//! usual transistor pair on USB-UART bridges. Both are active-high from the
//! host's point of view: asserting RTS holds the target in reset.

use crate::clock::Clock;
use crate::error::Result;
use crate::port::Port;
use log::{debug, info};
use std::time::Duration;

/// Hold time after each control-line change.
pub const LINE_HOLD: Duration = Duration::from_millis(100);

/// Time the firmware needs to boot and bring up its OTA receiver.
pub const BOOT_SETTLE: Duration = Duration::from_secs(2);

/// Reset the target into normal run mode and drop its boot output.
///
/// The delays are fixed hardware timings.
/// Transport errors are returned as-is.
pub fn reset_device<P, C>(port: &mut P, clock: &C) -> Result<()>
where
    P: Port + ?Sized,
    C: Clock + ?Sized,
{
    info!("Resetting device on {}...", port.name());

    // Boot-mode high, enable high: normal run mode
    port.set_dtr(false)?;
    port.set_rts(false)?;
    clock.sleep(LINE_HOLD);

    // Enable low: held in reset
    port.set_rts(true)?;
    clock.sleep(LINE_HOLD);

    // Enable high: boot starts
    port.set_rts(false)?;
    clock.sleep(LINE_HOLD);

    debug!("Waiting {} ms for boot", BOOT_SETTLE.as_millis());
    clock.sleep(BOOT_SETTLE);

    port.clear_input()?;
    info!("Device ready");
    Ok(())
}
