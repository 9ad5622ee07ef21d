//! Additive 8-bit frame checksum.
//!
//! The checksum is a plain truncating sum over the header and payload bytes.
//! It is appended as the last payload byte at transmit time and counted in the
//! on-wire `size` field.

/// Sum `bytes` modulo 256.
#[inline]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Check a buffer whose final byte is the checksum of everything before it.
///
/// Returns `false` for an empty buffer.
pub fn verify(bytes_with_sum: &[u8]) -> bool {
    match bytes_with_sum.split_last() {
        Some((sum, body)) => checksum(body) == *sum,
        None => false,
    }
}
