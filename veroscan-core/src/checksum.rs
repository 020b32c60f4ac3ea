//! Packet checksum
//!
//! 1. Sum the channel tag, both length bytes and every payload byte
//! 2. Keep the low 8 bits (wrapping)
//! 3. Take ones-complement: !sum
//!
//! The start marker is not covered. Any single flipped bit changes the sum by
//! a power of two below 256, so it is always detected.

use tracing::trace;

/// Calculate packet checksum
///
/// # Algorithm
///
/// ```text
/// 1. sum = channel + len_lo + len_hi + payload[0] + ... (wrapping u8)
/// 2. Return !sum
/// ```
///
/// # Examples
///
/// ```
/// use veroscan_core::checksum;
///
/// let checksum = checksum::calculate(0x10, &[0x10, 0x00, 0x00, 0x00]);
/// println!("Checksum: 0x{:02X}", checksum);
/// ```
pub fn calculate(channel: u8, payload: &[u8]) -> u8 {
    let len = (payload.len() as u16).to_le_bytes();

    let sum = payload
        .iter()
        .fold(channel.wrapping_add(len[0]).wrapping_add(len[1]), |acc, &b| {
            acc.wrapping_add(b)
        });

    let checksum = !sum;

    trace!(
        channel = channel,
        payload_len = payload.len(),
        checksum = format!("0x{:02X}", checksum),
        "Calculated checksum"
    );

    checksum
}

/// Verify checksum
pub fn verify(channel: u8, payload: &[u8], expected: u8) -> bool {
    calculate(channel, payload) == expected
}
