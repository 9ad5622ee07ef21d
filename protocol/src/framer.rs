//! # Framer
//!
//! Reassembles COBS frames out of an arbitrary byte stream and serialises
//! outgoing packets.
//!
//! ## RX State Machine
//!
//! ```text
//!            non-zero byte                 0x00
//!   Idle ─────────────────► Receiving ─────────────► decode ─► Idle
//!    ▲                          │                       │
//!    │         frame too long   ▼                       │ checksum / size / type
//!    └────────0x00──────── Discarding                   ▼ error: dropped, counted
//! ```
//!
//! Bytes may arrive one at a time, as a partial frame, or as several frames
//! in one chunk; the reassembly buffer carries whatever follows the last
//! delimiter into the next call. Corrupt frames are dropped silently and the
//! next delimiter re-arms the receiver.
//!
//! Validated packets go into a [`PacketRing`]. A full ring drops the new
//! packet and reports [`BufferError::Overflow`] instead of overwriting.

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::buffer::{BufferError, PacketRing, RX_SLOTS};
use crate::cobs::{self, DELIMITER};
use crate::error::FrameError;
use crate::packet::{Packet, Profile};
use crate::{MAX_ENCODED_FRAME_LEN, MAX_FRAME_LEN};

/// Receiver state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxState {
    /// Waiting for the first byte of a frame
    Idle,
    /// Collecting encoded bytes up to the next delimiter
    Receiving,
    /// Skipping an over-long frame until the next delimiter
    Discarding,
}

/// Framer counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FramerStats {
    /// Frames decoded and queued
    pub frames_ok: u32,
    /// Frames that failed COBS, size, type or checksum validation
    pub frames_corrupt: u32,
    /// Frames lost to an over-long burst or a full RX ring
    pub frames_dropped: u32,
    pub bytes_rx: u32,
    pub frames_tx: u32,
    pub bytes_tx: u32,
}

/// Incremental frame decoder and encoder for one link
pub struct Framer<const N: usize = RX_SLOTS> {
    profile: Profile,
    state: RxState,
    /// Encoded bytes of the frame being reassembled
    rx_scratch: Vec<u8, MAX_ENCODED_FRAME_LEN>,
    tx_scratch: [u8; MAX_ENCODED_FRAME_LEN],
    ring: PacketRing<N>,
    stats: FramerStats,
}

impl<const N: usize> Framer<N> {
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            state: RxState::Idle,
            rx_scratch: Vec::new(),
            tx_scratch: [0; MAX_ENCODED_FRAME_LEN],
            ring: PacketRing::new(),
            stats: FramerStats::default(),
        }
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    /// A frame is partially reassembled
    pub fn is_receiving(&self) -> bool {
        self.state == RxState::Receiving
    }

    /// At least one validated packet is waiting in the ring
    pub fn has_data(&self) -> bool {
        !self.ring.is_empty()
    }

    /// Number of validated packets waiting in the ring
    pub fn pending(&self) -> usize {
        self.ring.len()
    }

    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    /// Feed raw bytes from the transport.
    ///
    /// Returns the number of packets queued by this call. If the ring filled
    /// up, the remaining bytes are still consumed, the excess packets are
    /// dropped and [`BufferError::Overflow`] is returned.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<usize, BufferError> {
        self.stats.bytes_rx = self.stats.bytes_rx.wrapping_add(bytes.len() as u32);

        let mut queued = 0;
        let mut overflow = false;
        for &byte in bytes {
            if byte == DELIMITER {
                match self.state {
                    RxState::Idle => {}
                    RxState::Discarding => self.state = RxState::Idle,
                    RxState::Receiving => {
                        match self.finish_frame() {
                            Ok(true) => queued += 1,
                            Ok(false) => {}
                            Err(BufferError::Overflow) => overflow = true,
                        }
                        self.rx_scratch.clear();
                        self.state = RxState::Idle;
                    }
                }
                continue;
            }

            match self.state {
                RxState::Discarding => {}
                RxState::Idle | RxState::Receiving => {
                    // keep one slot free for the delimiter
                    if self.rx_scratch.len() >= MAX_ENCODED_FRAME_LEN - 1 {
                        log::debug!(
                            "frame exceeds {} encoded bytes, discarding",
                            MAX_ENCODED_FRAME_LEN
                        );
                        self.stats.frames_dropped = self.stats.frames_dropped.wrapping_add(1);
                        self.rx_scratch.clear();
                        self.state = RxState::Discarding;
                    } else {
                        let _ = self.rx_scratch.push(byte);
                        self.state = RxState::Receiving;
                    }
                }
            }
        }

        if overflow {
            Err(BufferError::Overflow)
        } else {
            Ok(queued)
        }
    }

    /// Decode the reassembled frame; `Ok(false)` when it was corrupt
    fn finish_frame(&mut self) -> Result<bool, BufferError> {
        let _ = self.rx_scratch.push(DELIMITER);

        let mut raw = [0u8; MAX_ENCODED_FRAME_LEN];
        let decoded = cobs::decode(&self.rx_scratch, &mut raw)
            .and_then(|len| Packet::decode_raw(self.profile, &raw[..len]));

        match decoded {
            Ok(packet) => {
                log::trace!(
                    "rx {:?} flags={:#04x} size={}",
                    packet.kind,
                    packet.flags,
                    packet.size()
                );
                if let Err(e) = self.ring.push(packet) {
                    log::warn!("rx ring full, packet dropped");
                    self.stats.frames_dropped = self.stats.frames_dropped.wrapping_add(1);
                    return Err(e);
                }
                self.stats.frames_ok = self.stats.frames_ok.wrapping_add(1);
                Ok(true)
            }
            Err(e) => {
                log::debug!("dropping corrupt frame: {}", e);
                self.stats.frames_corrupt = self.stats.frames_corrupt.wrapping_add(1);
                Ok(false)
            }
        }
    }

    /// Take the oldest validated packet
    pub fn read(&mut self) -> Option<Packet> {
        self.ring.pop()
    }

    /// Serialise `packet` into the TX scratch buffer: header, payload,
    /// checksum, COBS, delimiter.
    pub fn encode(&mut self, packet: &Packet) -> Result<&[u8], FrameError> {
        let mut raw = [0u8; MAX_FRAME_LEN];
        let raw_len = packet.encode_raw(self.profile, &mut raw)?;
        let len = cobs::encode_frame(&raw[..raw_len], &mut self.tx_scratch)?;
        Ok(&self.tx_scratch[..len])
    }

    /// Count a frame the transport fully accepted
    pub fn record_tx(&mut self, bytes: usize) {
        self.stats.frames_tx = self.stats.frames_tx.wrapping_add(1);
        self.stats.bytes_tx = self.stats.bytes_tx.wrapping_add(bytes as u32);
    }

    /// Drop the partial frame and every queued packet
    pub fn reset(&mut self) {
        self.rx_scratch.clear();
        self.state = RxState::Idle;
        self.ring.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{CommandFlags, PacketType, StatusFlags, UpdateFlags};
    use proptest::prelude::*;

    fn sample() -> Packet {
        let mut packet = Packet::update(UpdateFlags::CIRCUITS).with_timeout(3);
        packet.extend(&[0x01, 0x00, 0x03, 12, 0, 0, 50]).unwrap();
        packet
    }

    fn wire(packet: &Packet, profile: Profile) -> std::vec::Vec<u8> {
        let mut framer: Framer = Framer::new(profile);
        framer.encode(packet).unwrap().to_vec()
    }

    fn drain(framer: &mut Framer) -> std::vec::Vec<Packet> {
        core::iter::from_fn(|| framer.read()).collect()
    }

    #[test]
    fn test_whole_frame() {
        let mut framer: Framer = Framer::new(Profile::Extended);
        let frame = wire(&sample(), Profile::Extended);
        assert_eq!(*frame.last().unwrap(), DELIMITER);
        assert!(frame[..frame.len() - 1].iter().all(|b| *b != 0));

        assert_eq!(framer.push_bytes(&frame), Ok(1));
        assert!(framer.has_data());
        assert_eq!(framer.read(), Some(sample()));
        assert_eq!(framer.read(), None);
        assert_eq!(framer.stats().frames_ok, 1);
    }

    #[test]
    fn test_every_split_point() {
        let frame = wire(&sample(), Profile::Extended);
        for split in 0..=frame.len() {
            let mut framer: Framer = Framer::new(Profile::Extended);
            let (a, b) = frame.split_at(split);
            let first = framer.push_bytes(a).unwrap();
            let second = framer.push_bytes(b).unwrap();
            assert_eq!(first + second, 1, "split at {}", split);
            assert_eq!(drain(&mut framer), [sample()]);
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let frame = wire(&sample(), Profile::Extended);
        let mut framer: Framer = Framer::new(Profile::Extended);
        for (i, byte) in frame.iter().enumerate() {
            framer.push_bytes(core::slice::from_ref(byte)).unwrap();
            if i + 1 < frame.len() {
                assert!(framer.is_receiving());
                assert!(!framer.has_data());
            }
        }
        assert_eq!(framer.state(), RxState::Idle);
        assert_eq!(drain(&mut framer), [sample()]);
    }

    #[test]
    fn test_two_frames_and_a_partial_third() {
        let ping = {
            let mut p = Packet::status(StatusFlags::PING);
            p.push(2).unwrap();
            p
        };
        let mut chunk = wire(&sample(), Profile::Extended);
        chunk.extend(wire(&ping, Profile::Extended));
        let third = wire(&Packet::ack(), Profile::Extended);
        chunk.extend_from_slice(&third[..2]);

        let mut framer: Framer = Framer::new(Profile::Extended);
        assert_eq!(framer.push_bytes(&chunk), Ok(2));
        assert!(framer.is_receiving());
        assert_eq!(drain(&mut framer), [sample(), ping]);

        assert_eq!(framer.push_bytes(&third[2..]), Ok(1));
        assert_eq!(drain(&mut framer), [Packet::ack()]);
    }

    #[test]
    fn test_corrupt_frame_then_valid() {
        let mut raw = [0u8; MAX_FRAME_LEN];
        let n = sample().encode_raw(Profile::Extended, &mut raw).unwrap();
        raw[5] ^= 0x40;
        let mut stream = [0u8; MAX_ENCODED_FRAME_LEN];
        let m = cobs::encode_frame(&raw[..n], &mut stream).unwrap();

        let mut chunk = stream[..m].to_vec();
        chunk.extend(wire(&sample(), Profile::Extended));

        let mut framer: Framer = Framer::new(Profile::Extended);
        assert_eq!(framer.push_bytes(&chunk), Ok(1));
        assert_eq!(drain(&mut framer), [sample()]);
        assert_eq!(framer.stats().frames_corrupt, 1);
    }

    #[test]
    fn test_empty_frames_ignored() {
        let mut chunk = std::vec![0, 0, 0];
        chunk.extend(wire(&Packet::ack(), Profile::Extended));
        chunk.push(0);

        let mut framer: Framer = Framer::new(Profile::Extended);
        assert_eq!(framer.push_bytes(&chunk), Ok(1));
        assert_eq!(framer.stats().frames_corrupt, 0);
    }

    #[test]
    fn test_oversized_burst_discarded() {
        let mut chunk = std::vec![0x55u8; MAX_ENCODED_FRAME_LEN + 40];
        chunk.push(0);
        chunk.extend(wire(&sample(), Profile::Extended));

        let mut framer: Framer = Framer::new(Profile::Extended);
        assert_eq!(framer.push_bytes(&chunk), Ok(1));
        assert_eq!(framer.stats().frames_dropped, 1);
        assert_eq!(drain(&mut framer), [sample()]);
    }

    #[test]
    fn test_ring_overflow_reported() {
        let frame = wire(&Packet::ack(), Profile::Extended);
        let mut framer: Framer<2> = Framer::new(Profile::Extended);
        let chunk: std::vec::Vec<u8> = frame.iter().copied().cycle().take(frame.len() * 3).collect();

        assert_eq!(framer.push_bytes(&chunk), Err(BufferError::Overflow));
        assert_eq!(framer.pending(), 2);
        assert_eq!(framer.stats().frames_dropped, 1);

        // ring drained, framing still in sync
        framer.read();
        assert_eq!(framer.push_bytes(&frame), Ok(1));
    }

    #[test]
    fn test_compact_profile() {
        let packet = Packet::command(CommandFlags::SAVE | CommandFlags::RESPOND);
        let frame = wire(&packet, Profile::Compact);
        // code byte, 3 header bytes, delimiter; zero-valued fields add code bytes
        assert!(frame.len() <= 3 + 3);

        let mut framer: Framer = Framer::new(Profile::Compact);
        assert_eq!(framer.push_bytes(&frame), Ok(1));
        assert_eq!(framer.read(), Some(packet));

        // an extended frame is rejected by a compact receiver
        let extended = wire(&sample(), Profile::Extended);
        assert_eq!(framer.push_bytes(&extended), Ok(0));
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let mut packet = Packet::update(UpdateFlags::CIRCUITS);
        packet
            .extend(&[7u8; Profile::Compact.max_payload()])
            .unwrap();
        let mut framer: Framer = Framer::new(Profile::Extended);
        assert_eq!(
            framer.encode(&packet).map(|f| f.len()),
            Err(FrameError::PayloadTooLarge)
        );
    }

    fn arb_packet() -> impl Strategy<Value = Packet> {
        (0u8..4, any::<u8>(), any::<u8>(), proptest::collection::vec(any::<u8>(), 0..=250)).prop_map(
            |(kind, flags, timeout, payload)| {
                let mut packet = Packet::new(PacketType::try_from(kind).unwrap(), flags)
                    .with_timeout(timeout);
                packet.extend(&payload).unwrap();
                packet
            },
        )
    }

    proptest! {
        #[test]
        fn prop_reassembly_at_any_chunking(
            packets in proptest::collection::vec(arb_packet(), 1..4),
            chunk in 1usize..64,
        ) {
            let mut stream = std::vec::Vec::new();
            for packet in &packets {
                stream.extend(wire(packet, Profile::Extended));
            }

            let mut framer: Framer = Framer::new(Profile::Extended);
            let mut received = std::vec::Vec::new();
            for piece in stream.chunks(chunk) {
                framer.push_bytes(piece).unwrap();
                received.extend(drain(&mut framer));
            }
            prop_assert_eq!(received, packets);
        }
    }
}
