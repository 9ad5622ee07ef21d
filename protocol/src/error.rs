//! Error types for the framing and link layers.

use crate::buffer::BufferError;
use crate::builder::BuildError;
use crate::mask::MaskError;
use crate::traits::TransportError;

/// Errors during frame encoding or decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Output buffer too small for the encoded frame
    BufferTooSmall,
    /// Header plus payload exceeds the maximum frame size
    PayloadTooLarge,
    /// Raw frame shorter than the header
    TooShort,
    /// Header `size` disagrees with the bytes actually received
    SizeMismatch { declared: u8, actual: usize },
    /// Unknown packet type code
    UnknownType(u8),
    /// Checksum byte does not match the frame contents
    ChecksumMismatch,
    /// COBS block structure is invalid
    Cobs,
}

/// Errors surfaced by a link to its caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// The outgoing packet could not be framed
    Frame(FrameError),
    /// The outgoing packet could not be built
    Build(BuildError),
    /// Transport accepted fewer bytes than the encoded frame
    ShortWrite { written: usize, expected: usize },
    /// The RX ring was full and a validated packet was dropped
    RxOverflow,
    /// The transport reported a failure or was closed
    Transport(TransportError),
    /// Exit was requested; the link no longer polls or sends
    Closed,
}

impl From<FrameError> for LinkError {
    fn from(e: FrameError) -> Self {
        LinkError::Frame(e)
    }
}

impl From<BuildError> for LinkError {
    fn from(e: BuildError) -> Self {
        LinkError::Build(e)
    }
}

impl From<MaskError> for LinkError {
    fn from(e: MaskError) -> Self {
        LinkError::Build(BuildError::Mask(e))
    }
}

impl From<TransportError> for LinkError {
    fn from(e: TransportError) -> Self {
        LinkError::Transport(e)
    }
}

impl From<BufferError> for LinkError {
    fn from(e: BufferError) -> Self {
        match e {
            BufferError::Overflow => LinkError::RxOverflow,
        }
    }
}

impl core::fmt::Display for FrameError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FrameError::BufferTooSmall => f.write_str("buffer too small"),
            FrameError::PayloadTooLarge => f.write_str("payload too large"),
            FrameError::TooShort => f.write_str("frame shorter than header"),
            FrameError::SizeMismatch { declared, actual } => {
                write!(f, "size field {declared} but {actual} payload bytes")
            }
            FrameError::UnknownType(t) => write!(f, "unknown packet type {t}"),
            FrameError::ChecksumMismatch => f.write_str("checksum mismatch"),
            FrameError::Cobs => f.write_str("invalid COBS frame"),
        }
    }
}

impl core::fmt::Display for LinkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LinkError::Frame(e) => write!(f, "framing: {e}"),
            LinkError::Build(e) => write!(f, "packet build: {e:?}"),
            LinkError::ShortWrite { written, expected } => {
                write!(f, "short write: {written} of {expected} bytes")
            }
            LinkError::RxOverflow => f.write_str("rx ring overflow"),
            LinkError::Transport(e) => write!(f, "transport: {e:?}"),
            LinkError::Closed => f.write_str("link closed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FrameError {}

#[cfg(feature = "std")]
impl std::error::Error for LinkError {}
