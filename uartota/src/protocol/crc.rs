//! CRC16-XMODEM checksum.
//!
//! Polynomial 0x1021, initial value 0, no input or output reflection. The
//! device firmware computes the same sum over every frame, so this must stay
//! bit-for-bit identical to it.

/// CRC16-XMODEM generator polynomial.
pub const CRC16_POLY: u16 = 0x1021;

/// Compute the CRC16-XMODEM checksum of `data`.
///
/// Empty input yields 0.
#[allow(clippy::cast_possible_truncation)]
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    // 17-bit working register: the carry out of bit 15 is tested at bit 16.
    let mut crc: u32 = 0;
    for &byte in data {
        crc ^= u32::from(byte) << 8;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x1_0000 != 0 {
                crc ^= u32::from(CRC16_POLY);
            }
        }
        crc &= 0xFFFF;
    }
    crc as u16
}
