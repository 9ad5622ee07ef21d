//! # Packet Ring Buffer
//!
//! Fixed-capacity FIFO of decoded packets sitting between the framer (producer)
//! and the link consumer.
//!
//! ## Memory Layout
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬──────────┐
//! │ slot 0   │ slot 1   │ slot 2   │ slot 3   │ ...      │
//! └──────────┴──────────┴──────────┴──────────┴──────────┘
//!                 ▲                     ▲
//!               tail                  head
//!         (consumer reads)     (framer writes)
//! ```
//!
//! `head` and `tail` are free-running counters; the slot index is the counter
//! modulo the capacity. The ring never overwrites an unconsumed slot: pushing
//! into a full ring fails with [`BufferError::Overflow`].
//!
//! The ring has exactly one owner. Sharing it between threads goes through a
//! channel owned by that thread, never through the indices.

use crate::packet::{Packet, PacketType};

/// Default number of RX slots per link
pub const RX_SLOTS: usize = 8;

const EMPTY_SLOT: Packet = Packet::new(PacketType::Ack, 0);

/// Errors specific to ring operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferError {
    /// Attempted to push into a full ring
    Overflow,
}

/// FIFO of packet slots with independent head and tail
pub struct PacketRing<const N: usize = RX_SLOTS> {
    slots: [Packet; N],
    /// Next slot the producer writes
    head: usize,
    /// Next slot the consumer reads
    tail: usize,
}

impl<const N: usize> PacketRing<N> {
    /// Create an empty ring
    pub const fn new() -> Self {
        Self {
            slots: [EMPTY_SLOT; N],
            head: 0,
            tail: 0,
        }
    }

    /// Total number of slots
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of unconsumed packets
    #[inline]
    pub fn len(&self) -> usize {
        self.head.wrapping_sub(self.tail)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    /// Store a packet at the head
    pub fn push(&mut self, packet: Packet) -> Result<(), BufferError> {
        if self.is_full() {
            return Err(BufferError::Overflow);
        }
        self.slots[self.head % N] = packet;
        self.head = self.head.wrapping_add(1);
        Ok(())
    }

    /// Take the oldest unconsumed packet
    pub fn pop(&mut self) -> Option<Packet> {
        if self.is_empty() {
            return None;
        }
        let slot = core::mem::replace(&mut self.slots[self.tail % N], EMPTY_SLOT);
        self.tail = self.tail.wrapping_add(1);
        Some(slot)
    }

    /// Look at the oldest unconsumed packet without consuming it
    pub fn peek(&self) -> Option<&Packet> {
        if self.is_empty() {
            None
        } else {
            Some(&self.slots[self.tail % N])
        }
    }

    /// Drop every unconsumed packet
    pub fn reset(&mut self) {
        while self.pop().is_some() {}
        self.head = 0;
        self.tail = 0;
    }
}

impl<const N: usize> Default for PacketRing<N> {
    fn default() -> Self {
        Self::new()
    }
}
