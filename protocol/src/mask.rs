//! # Mask Codec
//!
//! Circuit and parameter masks select which slice of the circuit table a
//! packet carries. Values travel as two-byte fixed point with 1/100
//! resolution:
//!
//! ```text
//! ┌──────────────┬────────────┬────────────┬───────┬───────┬─────┐
//! │ circuit mask │ param mask │ param mask │ value │ value │ ... │
//! │    1 byte    │  high byte │  low byte  │ 2 B   │ 2 B   │     │
//! └──────────────┴────────────┴────────────┴───────┴───────┴─────┘
//!
//! value = [whole part (truncated), hundredths (truncated)]
//! ```
//!
//! Values carry no tag, only position: circuits are the outer loop and
//! parameters the inner loop, both in ascending bit order.

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::packet::Packet;
use crate::traits::CircuitTable;
use crate::{NUM_CIRCUITS, NUM_PARAMS};

/// Largest value representable on the wire
pub const MAX_VALUE: f32 = 255.99;

/// Absorbs binary representation error so 0.29 encodes as 29 hundredths.
const FRACTION_EPSILON: f32 = 0.005;

/// Bytes taken by the circuit and parameter masks
pub const MASKS_LEN: usize = 3;

/// Errors from packing or unpacking masked values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MaskError {
    /// Circuit index beyond the circuits present
    CircuitOutOfRange(u8),
    /// Parameter index beyond the parameters present
    ParamOutOfRange(u8),
    /// Packed values do not fit the packet payload
    PayloadTooLarge,
    /// Source ended before every masked value was read
    Truncated,
}

macro_rules! index_mask {
    ($(#[$meta:meta])* $name:ident, $bits:ty, $limit:expr, $err:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        pub struct $name($bits);

        impl $name {
            pub const EMPTY: Self = Self(0);
            pub const ALL: Self = Self(<$bits>::MAX);

            pub const fn from_bits(bits: $bits) -> Self {
                Self(bits)
            }

            pub const fn bits(self) -> $bits {
                self.0
            }

            /// Mask with only `index` set
            pub fn single(index: usize) -> Result<Self, MaskError> {
                let mut mask = Self::EMPTY;
                mask.insert(index)?;
                Ok(mask)
            }

            /// Mask of the first `count` indices, clamped to the mask width
            pub fn first(count: usize) -> Self {
                if count >= $limit {
                    Self::ALL
                } else {
                    Self(((1u32 << count) - 1) as $bits)
                }
            }

            pub fn insert(&mut self, index: usize) -> Result<(), MaskError> {
                if index >= $limit {
                    return Err(MaskError::$err(index.min(u8::MAX as usize) as u8));
                }
                self.0 |= 1 << index;
                Ok(())
            }

            pub fn remove(&mut self, index: usize) {
                if index < $limit {
                    self.0 &= !(1 << index);
                }
            }

            pub fn contains(self, index: usize) -> bool {
                index < $limit && (self.0 >> index) & 1 != 0
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub const fn count(self) -> usize {
                self.0.count_ones() as usize
            }

            /// Set indices in ascending order
            pub fn iter(self) -> impl Iterator<Item = usize> {
                (0..$limit).filter(move |i| (self.0 >> i) & 1 != 0)
            }

            /// Highest set index, if any
            pub fn highest(self) -> Option<usize> {
                self.iter().last()
            }
        }
    };
}

index_mask! {
    /// Selection of circuits (bit n = circuit n)
    CircuitMask, u8, NUM_CIRCUITS, CircuitOutOfRange
}

index_mask! {
    /// Selection of parameters (bit n = parameter n)
    ParamMask, u16, NUM_PARAMS, ParamOutOfRange
}

/// Encode a value as `[whole, hundredths]`, truncating both parts.
///
/// The hundredths are truncated after adding [`FRACTION_EPSILON`], so a
/// fraction within 0.005 below the next hundredth rounds up to it: 0.12996
/// encodes as 13, not 12. Without that, values typed at 1/100 resolution
/// such as 0.29 (stored as 0.28999...) would lose a hundredth on every
/// round trip.
///
/// Values outside `0..=255.99` are clamped; NaN encodes as zero.
pub fn encode_value(value: f32) -> [u8; 2] {
    let value = if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, MAX_VALUE)
    };
    let whole = value as u8;
    let hundredths = ((value - whole as f32) * 100.0 + FRACTION_EPSILON) as u8;
    [whole, hundredths.min(99)]
}

/// Decode a `[whole, hundredths]` pair
pub fn decode_value(bytes: [u8; 2]) -> f32 {
    bytes[0] as f32 + bytes[1] as f32 / 100.0
}

/// Bytes produced by [`pack_params`] for these masks
pub fn packed_len(circuits: CircuitMask, params: ParamMask) -> usize {
    MASKS_LEN + 2 * circuits.count() * params.count()
}

/// Reject mask bits naming circuits or parameters the table does not have
pub fn check_bounds<T: CircuitTable + ?Sized>(
    circuits: CircuitMask,
    params: ParamMask,
    table: &T,
) -> Result<(), MaskError> {
    if let Some(c) = circuits.highest().filter(|c| *c >= table.circuit_count()) {
        return Err(MaskError::CircuitOutOfRange(c as u8));
    }
    if let Some(p) = params.highest().filter(|p| *p >= table.param_count()) {
        return Err(MaskError::ParamOutOfRange(p as u8));
    }
    Ok(())
}

/// Append the circuit mask and the parameter mask (high byte first)
pub fn write_masks(
    dest: &mut Packet,
    circuits: CircuitMask,
    params: ParamMask,
) -> Result<(), MaskError> {
    let [hi, lo] = params.bits().to_be_bytes();
    dest.extend(&[circuits.bits(), hi, lo])
        .map_err(|_| MaskError::PayloadTooLarge)
}

/// Read the circuit and parameter masks from the start of `src`
pub fn read_masks(src: &[u8]) -> Result<(CircuitMask, ParamMask), MaskError> {
    match src {
        [c, hi, lo, ..] => Ok((
            CircuitMask::from_bits(*c),
            ParamMask::from_bits(u16::from_be_bytes([*hi, *lo])),
        )),
        _ => Err(MaskError::Truncated),
    }
}

/// Append masks followed by every selected value, circuits outer, params inner.
///
/// Returns the number of bytes written. Nothing is written on error.
pub fn pack_params<T: CircuitTable + ?Sized>(
    dest: &mut Packet,
    circuits: CircuitMask,
    params: ParamMask,
    table: &T,
) -> Result<usize, MaskError> {
    check_bounds(circuits, params, table)?;

    let len = packed_len(circuits, params);
    if dest.payload.len() + len > dest.payload.capacity() {
        return Err(MaskError::PayloadTooLarge);
    }

    write_masks(dest, circuits, params)?;
    for circuit in circuits.iter() {
        for param in params.iter() {
            dest.extend(&encode_value(table.param(circuit, param)))
                .map_err(|_| MaskError::PayloadTooLarge)?;
        }
    }
    Ok(len)
}

/// Result of [`unpack_params`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unpacked {
    pub circuits: CircuitMask,
    pub params: ParamMask,
    /// Bytes consumed from the source
    pub consumed: usize,
}

/// Inverse of [`pack_params`]: write every masked value into `table`.
///
/// The table is untouched unless the whole section is present and in range.
pub fn unpack_params<T: CircuitTable + ?Sized>(
    src: &[u8],
    table: &mut T,
) -> Result<Unpacked, MaskError> {
    let (circuits, params) = read_masks(src)?;
    check_bounds(circuits, params, table)?;

    let consumed = packed_len(circuits, params);
    if src.len() < consumed {
        return Err(MaskError::Truncated);
    }

    let mut values = src[MASKS_LEN..consumed].chunks_exact(2);
    for circuit in circuits.iter() {
        for param in params.iter() {
            if let Some(pair) = values.next() {
                table.set_param(circuit, param, decode_value([pair[0], pair[1]]));
            }
        }
    }

    Ok(Unpacked {
        circuits,
        params,
        consumed,
    })
}

/// Split `circuits` into ascending groups whose packed size fits `budget` bytes.
///
/// A circuit that cannot fit on its own still gets its own group; packing it
/// then fails with [`MaskError::PayloadTooLarge`].
pub fn split_circuits(
    circuits: CircuitMask,
    params: ParamMask,
    budget: usize,
) -> Vec<CircuitMask, NUM_CIRCUITS> {
    let mut groups = Vec::new();
    let mut current = CircuitMask::EMPTY;
    for circuit in circuits.iter() {
        let mut candidate = current;
        // index comes from iter(), always in range
        let _ = candidate.insert(circuit);
        if !current.is_empty() && packed_len(candidate, params) > budget {
            let _ = groups.push(current);
            current = CircuitMask::EMPTY;
            let _ = current.insert(circuit);
        } else {
            current = candidate;
        }
    }
    if !current.is_empty() {
        let _ = groups.push(current);
    }
    groups
}
