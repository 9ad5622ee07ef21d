//! # COBS Byte Stuffing
//!
//! Consistent Overhead Byte Stuffing removes every zero byte from a frame so a
//! single `0x00` can delimit frames on the wire. Runs of 254 non-zero bytes
//! force an extra block boundary, so the overhead is one byte per started run
//! of 254 bytes.
//!
//! ```text
//! raw:      11 22 00 33
//! encoded:  03 11 22 02 33 00
//!           ^        ^     ^
//!           |        |     delimiter (appended by the framer)
//!           block lengths
//! ```
//!
//! [`encode`] never writes the delimiter; [`encode_frame`] does. [`decode`]
//! expects the delimiter and stops at it.

use crate::error::FrameError;

/// Frame delimiter.
pub const DELIMITER: u8 = corncobs::ZERO;

/// Worst-case encoded length of `raw_len` bytes, including the delimiter.
///
/// One code byte per started block of 254 bytes, one leading code byte, one
/// delimiter.
pub const fn max_encoded_len(raw_len: usize) -> usize {
    raw_len + raw_len / 254 + 2
}

/// Encode `data` into `out` without the trailing delimiter.
///
/// Returns the number of bytes written. `out` must hold at least
/// [`max_encoded_len`] bytes for the input length.
pub fn encode(data: &[u8], out: &mut [u8]) -> Result<usize, FrameError> {
    let written = encode_frame(data, out)?;
    Ok(written - 1)
}

/// Encode `data` into `out` and terminate it with [`DELIMITER`].
pub fn encode_frame(data: &[u8], out: &mut [u8]) -> Result<usize, FrameError> {
    if out.len() < max_encoded_len(data.len()) {
        return Err(FrameError::BufferTooSmall);
    }
    Ok(corncobs::encode_buf(data, out))
}

/// Decode one delimited frame from `encoded` into `out`.
///
/// `encoded` must end with [`DELIMITER`]. `out` must be at least as long as
/// the encoded frame.
pub fn decode(encoded: &[u8], out: &mut [u8]) -> Result<usize, FrameError> {
    if out.len() < encoded.len() {
        return Err(FrameError::BufferTooSmall);
    }
    corncobs::decode_buf(encoded, out).map_err(|_| FrameError::Cobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roundtrip(data: &[u8]) -> std::vec::Vec<u8> {
        let mut encoded = std::vec![0u8; max_encoded_len(data.len())];
        let n = encode(data, &mut encoded).unwrap();
        assert!(
            encoded[..n].iter().all(|b| *b != DELIMITER),
            "zero byte inside encoded body"
        );
        encoded.truncate(n);
        encoded.push(DELIMITER);

        let mut decoded = std::vec![0u8; encoded.len()];
        let m = decode(&encoded, &mut decoded).unwrap();
        decoded.truncate(m);
        decoded
    }

    #[test]
    fn test_known_vector() {
        let mut out = [0u8; 8];
        let n = encode_frame(&[0x11, 0x22, 0x00, 0x33], &mut out).unwrap();
        assert_eq!(&out[..n], &[0x03, 0x11, 0x22, 0x02, 0x33, 0x00]);
    }

    #[test]
    fn test_encode_omits_delimiter() {
        let mut out = [0u8; 8];
        let n = encode(&[0x01, 0x02], &mut out).unwrap();
        assert_eq!(&out[..n], &[0x03, 0x01, 0x02]);
    }

    #[test]
    fn test_empty_input() {
        assert!(roundtrip(&[]).is_empty());
    }

    #[test]
    fn test_all_zero_input() {
        let data = [0u8; 40];
        assert_eq!(roundtrip(&data), data);
    }

    #[test]
    fn test_long_non_zero_runs() {
        for len in [253usize, 254, 255, 300, 500] {
            let data: std::vec::Vec<u8> = (0..len).map(|i| (i % 255) as u8 + 1).collect();
            assert_eq!(roundtrip(&data), data, "len {len}");
        }
    }

    #[test]
    fn test_output_too_small() {
        let mut out = [0u8; 3];
        assert_eq!(
            encode(&[1, 2, 3, 4], &mut out),
            Err(FrameError::BufferTooSmall)
        );
    }

    proptest! {
        #[test]
        fn prop_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..500)) {
            prop_assert_eq!(roundtrip(&data), data);
        }

        #[test]
        fn prop_roundtrip_sparse_zeros(data in proptest::collection::vec(prop_oneof![Just(0u8), 1u8..=255], 0..500)) {
            prop_assert_eq!(roundtrip(&data), data);
        }
    }
}
