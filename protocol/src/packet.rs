//! # Packet Model
//!
//! A packet is a fixed header followed by a variable payload whose layout is
//! selected by the packet type and its flag bits.
//!
//! ## Raw Frame Format (before COBS)
//!
//! ```text
//! Extended profile (canonical):
//! ┌────────┬────────┬────────┬─────────┬──────────────────┬──────────┐
//! │  Type  │ Flags  │  Size  │ Timeout │     Payload      │ Checksum │
//! │ 1 byte │ 1 byte │ 1 byte │ 1 byte  │  Variable size   │  1 byte  │
//! └────────┴────────┴────────┴─────────┴──────────────────┴──────────┘
//!
//! Compact profile:
//! ┌────────┬────────┬────────┬──────────────────┐
//! │  Type  │ Flags  │  Size  │     Payload      │
//! └────────┴────────┴────────┴──────────────────┘
//! ```
//!
//! `Size` counts the payload plus the checksum byte when one is present. The
//! whole raw frame never exceeds [`MAX_FRAME_LEN`] bytes.

use core::ops::{BitOr, BitOrAssign};

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::checksum;
use crate::error::FrameError;
use crate::MAX_FRAME_LEN;

/// Payload storage capacity: the largest payload any profile can carry.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - Profile::Compact.header_len();

/// Header layout variants found on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Profile {
    /// 4-byte header with timeout, trailing checksum
    #[default]
    Extended,
    /// 3-byte header, no timeout, no checksum
    Compact,
}

impl Profile {
    /// Header length in bytes
    pub const fn header_len(self) -> usize {
        match self {
            Profile::Extended => 4,
            Profile::Compact => 3,
        }
    }

    /// Bytes appended after the payload
    pub const fn trailer_len(self) -> usize {
        match self {
            Profile::Extended => 1,
            Profile::Compact => 0,
        }
    }

    /// Whether frames carry a checksum byte
    pub const fn checksummed(self) -> bool {
        self.trailer_len() != 0
    }

    /// Largest payload this profile can carry
    pub const fn max_payload(self) -> usize {
        MAX_FRAME_LEN - self.header_len() - self.trailer_len()
    }
}

/// Packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PacketType {
    /// Circuit/system state, or a request for it
    Update = 0,
    /// Mode and parameter changes, save/log/dump requests
    Command = 1,
    /// Ping and timeout notifications
    Status = 2,
    /// Acknowledgment
    Ack = 3,
}

impl PacketType {
    /// Single-bit mask for this type, used by ack masks
    pub const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl TryFrom<u8> for PacketType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Update),
            1 => Ok(Self::Command),
            2 => Ok(Self::Status),
            3 => Ok(Self::Ack),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

macro_rules! flag_set {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$fmeta:meta])* $flag:ident = $bit:expr ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        pub struct $name(u8);

        impl $name {
            $( $(#[$fmeta])* pub const $flag: Self = Self(1 << $bit); )*

            /// No flags set
            pub const fn empty() -> Self {
                Self(0)
            }

            /// Wrap raw header bits
            pub const fn from_bits(bits: u8) -> Self {
                Self(bits)
            }

            /// Raw header bits
            pub const fn bits(self) -> u8 {
                self.0
            }

            /// True if every bit of `other` is set
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }
    };
}

flag_set! {
    /// Flags of an UPDATE packet
    UpdateFlags {
        /// System section present / requested
        SYSTEM = 0,
        /// Circuit section present / requested
        CIRCUITS = 1,
        /// Update was relayed from a remote node
        REMOTE = 2,
        /// Request everything regardless of masks
        REFRESH = 3,
        /// Circuits in the mask were disabled
        REMOVE = 4,
    }
}

flag_set! {
    /// Flags of a COMMAND packet. Bit 0 selects a response; bits 1..7 select
    /// payload sections in ascending order.
    CommandFlags {
        RESPOND = 0,
        MODESET = 1,
        PARAMSET = 2,
        SAVE = 3,
        GETLOG = 4,
        DUMPCONFIG = 5,
    }
}

flag_set! {
    /// Flags of a STATUS packet
    StatusFlags {
        TIMEOUT = 0,
        PING = 1,
    }
}

/// One decoded packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Packet type
    pub kind: PacketType,
    /// Type-scoped flag bits
    pub flags: u8,
    /// Seconds until the sender abandons the exchange (0 = untracked)
    pub timeout: u8,
    /// Payload without the checksum byte
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
}

impl Packet {
    /// Empty packet of the given type
    pub const fn new(kind: PacketType, flags: u8) -> Self {
        Self {
            kind,
            flags,
            timeout: 0,
            payload: Vec::new(),
        }
    }

    pub const fn update(flags: UpdateFlags) -> Self {
        Self::new(PacketType::Update, flags.bits())
    }

    pub const fn command(flags: CommandFlags) -> Self {
        Self::new(PacketType::Command, flags.bits())
    }

    pub const fn status(flags: StatusFlags) -> Self {
        Self::new(PacketType::Status, flags.bits())
    }

    pub const fn ack() -> Self {
        Self::new(PacketType::Ack, 0)
    }

    /// Set the exchange timeout in seconds
    pub fn with_timeout(mut self, seconds: u8) -> Self {
        self.timeout = seconds;
        self
    }

    /// Append bytes to the payload
    pub fn extend(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        self.payload
            .extend_from_slice(bytes)
            .map_err(|_| FrameError::PayloadTooLarge)
    }

    /// Append one byte to the payload
    pub fn push(&mut self, byte: u8) -> Result<(), FrameError> {
        self.payload
            .push(byte)
            .map_err(|_| FrameError::PayloadTooLarge)
    }

    /// Semantic payload length
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Value of the on-wire size field under `profile`
    pub fn wire_size(&self, profile: Profile) -> usize {
        self.payload.len() + profile.trailer_len()
    }

    pub fn update_flags(&self) -> UpdateFlags {
        UpdateFlags::from_bits(self.flags)
    }

    pub fn command_flags(&self) -> CommandFlags {
        CommandFlags::from_bits(self.flags)
    }

    pub fn status_flags(&self) -> StatusFlags {
        StatusFlags::from_bits(self.flags)
    }

    /// Serialize header, payload and checksum into `out`
    ///
    /// Returns the number of bytes written.
    pub fn encode_raw(&self, profile: Profile, out: &mut [u8]) -> Result<usize, FrameError> {
        if self.payload.len() > profile.max_payload() {
            return Err(FrameError::PayloadTooLarge);
        }

        let header_len = profile.header_len();
        let body_len = header_len + self.payload.len();
        let total = body_len + profile.trailer_len();
        if out.len() < total {
            return Err(FrameError::BufferTooSmall);
        }

        out[0] = self.kind as u8;
        out[1] = self.flags;
        out[2] = self.wire_size(profile) as u8;
        if profile == Profile::Extended {
            out[3] = self.timeout;
        }
        out[header_len..body_len].copy_from_slice(&self.payload);

        if profile.checksummed() {
            out[body_len] = checksum::checksum(&out[..body_len]);
        }

        Ok(total)
    }

    /// Parse a raw (already COBS-decoded) frame
    pub fn decode_raw(profile: Profile, raw: &[u8]) -> Result<Self, FrameError> {
        let header_len = profile.header_len();
        if raw.len() < header_len + profile.trailer_len() {
            return Err(FrameError::TooShort);
        }

        let kind = PacketType::try_from(raw[0])?;
        let declared = raw[2];
        let actual = raw.len() - header_len;
        if declared as usize != actual {
            return Err(FrameError::SizeMismatch { declared, actual });
        }

        if profile.checksummed() && !checksum::verify(raw) {
            return Err(FrameError::ChecksumMismatch);
        }

        let timeout = match profile {
            Profile::Extended => raw[3],
            Profile::Compact => 0,
        };
        let payload = Vec::from_slice(&raw[header_len..raw.len() - profile.trailer_len()])
            .map_err(|_| FrameError::PayloadTooLarge)?;

        Ok(Self {
            kind,
            flags: raw[1],
            timeout,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extended_layout() {
        let mut packet = Packet::command(CommandFlags::RESPOND | CommandFlags::SAVE).with_timeout(3);
        packet.extend(&[0x10, 0x20]).unwrap();

        let mut raw = [0u8; MAX_FRAME_LEN];
        let len = packet.encode_raw(Profile::Extended, &mut raw).unwrap();
        assert_eq!(len, 7);
        assert_eq!(&raw[..6], &[1, 0b1001, 3, 3, 0x10, 0x20]);
        assert_eq!(raw[6], checksum::checksum(&raw[..6]));

        let parsed = Packet::decode_raw(Profile::Extended, &raw[..len]).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_compact_layout_drops_timeout() {
        let mut packet = Packet::status(StatusFlags::PING).with_timeout(9);
        packet.push(4).unwrap();

        let mut raw = [0u8; 16];
        let len = packet.encode_raw(Profile::Compact, &mut raw).unwrap();
        assert_eq!(&raw[..len], &[2, 0b10, 1, 4]);

        let parsed = Packet::decode_raw(Profile::Compact, &raw[..len]).unwrap();
        assert_eq!(parsed.timeout, 0);
        assert_eq!(parsed.payload.as_slice(), &[4]);
    }

    #[test]
    fn test_payload_limit_per_profile() {
        let mut packet = Packet::update(UpdateFlags::CIRCUITS);
        packet.extend(&[0xAA; 251]).unwrap();

        let mut raw = [0u8; 512];
        assert_eq!(
            packet.encode_raw(Profile::Extended, &mut raw),
            Err(FrameError::PayloadTooLarge)
        );
        assert_eq!(packet.encode_raw(Profile::Compact, &mut raw), Ok(254));

        let mut full = Packet::ack();
        full.extend(&[0u8; MAX_PAYLOAD_LEN]).unwrap();
        assert_eq!(full.push(1), Err(FrameError::PayloadTooLarge));
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        let mut packet = Packet::update(UpdateFlags::SYSTEM);
        packet.extend(&[1, 2, 3]).unwrap();
        let mut raw = [0u8; 16];
        let len = packet.encode_raw(Profile::Extended, &mut raw).unwrap();

        raw[5] ^= 0x01;
        assert_eq!(
            Packet::decode_raw(Profile::Extended, &raw[..len]),
            Err(FrameError::ChecksumMismatch)
        );
    }

    #[test]
    fn test_size_field_checked() {
        let raw = [0u8, 0, 5, 0, 1, 1];
        assert!(matches!(
            Packet::decode_raw(Profile::Extended, &raw),
            Err(FrameError::SizeMismatch { declared: 5, actual: 2 })
        ));
        assert_eq!(
            Packet::decode_raw(Profile::Extended, &[3, 0, 1]),
            Err(FrameError::TooShort)
        );
    }

    #[test]
    fn test_unknown_type() {
        assert_eq!(PacketType::try_from(3), Ok(PacketType::Ack));
        assert_eq!(PacketType::try_from(7), Err(FrameError::UnknownType(7)));
    }

    #[test]
    fn test_flag_set_ops() {
        let mut flags = CommandFlags::MODESET | CommandFlags::PARAMSET;
        assert!(flags.contains(CommandFlags::PARAMSET));
        assert!(!flags.contains(CommandFlags::RESPOND));
        flags.remove(CommandFlags::MODESET);
        flags.insert(CommandFlags::RESPOND);
        assert_eq!(flags.bits(), 0b101);
        assert_eq!(UpdateFlags::REMOVE.bits(), 0x10);
        assert_eq!(StatusFlags::PING.bits(), 0x02);
    }
}
