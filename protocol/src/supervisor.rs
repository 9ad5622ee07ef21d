//! # Link Supervisor
//!
//! Tracks at most one outstanding exchange per link.
//!
//! ```text
//!   Idle ──arm──► AwaitingAck ──reply in ack mask──► Idle
//!                      │
//!                      └──now - issued >= timeout──► Idle (+ timeout signal)
//! ```
//!
//! The supervisor only reports a timeout. Whether to resend, reconnect or
//! tell the original sender is up to the caller.

use core::ops::BitOr;

use crate::packet::{CommandFlags, Packet, PacketType, StatusFlags};

/// Set of packet types that satisfy a pending exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AckMask(u8);

impl AckMask {
    pub const NONE: Self = Self(0);
    pub const UPDATE: Self = Self::of(PacketType::Update);
    pub const COMMAND: Self = Self::of(PacketType::Command);
    pub const STATUS: Self = Self::of(PacketType::Status);
    pub const ACK: Self = Self::of(PacketType::Ack);

    pub const fn of(kind: PacketType) -> Self {
        Self(kind.bit())
    }

    pub const fn accepts(self, kind: PacketType) -> bool {
        self.0 & kind.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Reply types an outgoing packet waits for
    ///
    /// - UPDATE: an ACK or the UPDATE carrying the data
    /// - COMMAND with RESPOND: an ACK, or an UPDATE when DUMPCONFIG is set
    /// - STATUS with PING: the STATUS echo
    /// - anything else expects nothing
    pub fn for_request(packet: &Packet) -> Self {
        match packet.kind {
            PacketType::Update => Self::ACK | Self::UPDATE,
            PacketType::Command => {
                let flags = packet.command_flags();
                if !flags.contains(CommandFlags::RESPOND) {
                    Self::NONE
                } else if flags.contains(CommandFlags::DUMPCONFIG) {
                    Self::ACK | Self::UPDATE
                } else {
                    Self::ACK
                }
            }
            PacketType::Status if packet.status_flags().contains(StatusFlags::PING) => {
                Self::STATUS
            }
            PacketType::Status | PacketType::Ack => Self::NONE,
        }
    }
}

impl BitOr for AckMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// State of the single tracked exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ExchangeState {
    #[default]
    Idle,
    AwaitingAck {
        issued_ms: u64,
        timeout_ms: u64,
        accepts: AckMask,
    },
}

#[derive(Debug, Default)]
pub struct Supervisor {
    state: ExchangeState,
}

impl Supervisor {
    pub const fn new() -> Self {
        Self {
            state: ExchangeState::Idle,
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn is_awaiting_ack(&self) -> bool {
        matches!(self.state, ExchangeState::AwaitingAck { .. })
    }

    /// Start tracking `packet` if it carries a timeout and expects a reply.
    ///
    /// A new exchange replaces any pending one. Returns whether it armed.
    pub fn arm(&mut self, packet: &Packet, now_ms: u64) -> bool {
        let accepts = AckMask::for_request(packet);
        if packet.timeout == 0 || accepts.is_empty() {
            return false;
        }
        if self.is_awaiting_ack() {
            log::debug!("replacing pending exchange");
        }
        self.state = ExchangeState::AwaitingAck {
            issued_ms: now_ms,
            timeout_ms: u64::from(packet.timeout) * 1000,
            accepts,
        };
        true
    }

    /// Note a received packet. Returns true if it satisfied the pending
    /// exchange.
    pub fn observe(&mut self, kind: PacketType) -> bool {
        match self.state {
            ExchangeState::AwaitingAck { accepts, .. } if accepts.accepts(kind) => {
                self.state = ExchangeState::Idle;
                true
            }
            _ => false,
        }
    }

    /// True exactly once when the pending exchange has run out of time
    pub fn check_timeout(&mut self, now_ms: u64) -> bool {
        match self.state {
            ExchangeState::AwaitingAck {
                issued_ms,
                timeout_ms,
                ..
            } if now_ms.saturating_sub(issued_ms) >= timeout_ms => {
                log::warn!("exchange timed out after {} ms", timeout_ms);
                self.state = ExchangeState::Idle;
                true
            }
            _ => false,
        }
    }

    /// Abandon the pending exchange without signalling
    pub fn cancel(&mut self) {
        self.state = ExchangeState::Idle;
    }
}
