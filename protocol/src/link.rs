//! # Link
//!
//! One cooperative, single-owner connection: a [`Transport`], a [`Framer`]
//! and a [`Supervisor`] driven by [`Link::poll_link`] once per tick.
//!
//! ```text
//! poll_link:  exit? ─► ring empty? read one chunk ─► framer ─► pop one packet
//!                                                               │
//!                                               supervisor.observe(kind)
//!
//! send_*:     build ─► framer.encode ─► transport.write_all ─► supervisor.arm
//! ```
//!
//! Every send reports only whether the frame left in full. Replies surface
//! later through `poll_link`; a missing reply surfaces through
//! [`Link::check_timeout`].

use crate::buffer::RX_SLOTS;
use crate::builder::{build_command, build_ping, build_update_request, ValueContext};
use crate::error::LinkError;
use crate::framer::{Framer, FramerStats, RxState};
use crate::mask::{CircuitMask, ParamMask};
use crate::packet::{CommandFlags, Packet, UpdateFlags};
use crate::supervisor::{AckMask, ExchangeState, Supervisor};
use crate::traits::{Clock, LinkConfig, Transport, TransportError};

/// Bytes read from the transport per poll
pub const RX_CHUNK_LEN: usize = 64;

/// Observable link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    Idle,
    /// A frame is partially reassembled
    Receiving,
    AwaitingAck { deadline_ms: u64, accepts: AckMask },
    /// The transport reported a hang-up
    Disconnected,
    /// Exit was requested
    Closed,
}

pub struct Link<T, C, const N: usize = RX_SLOTS> {
    transport: T,
    clock: C,
    config: LinkConfig,
    framer: Framer<N>,
    supervisor: Supervisor,
    disconnected: bool,
    exit_requested: bool,
}

impl<T: Transport, C: Clock, const N: usize> Link<T, C, N> {
    pub fn new(transport: T, clock: C, config: LinkConfig) -> Self {
        Self {
            transport,
            clock,
            framer: Framer::new(config.profile),
            config,
            supervisor: Supervisor::new(),
            disconnected: false,
            exit_requested: false,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn stats(&self) -> FramerStats {
        self.framer.stats()
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn state(&self) -> LinkState {
        if self.exit_requested {
            return LinkState::Closed;
        }
        if self.disconnected {
            return LinkState::Disconnected;
        }
        if let ExchangeState::AwaitingAck {
            issued_ms,
            timeout_ms,
            accepts,
        } = self.supervisor.state()
        {
            return LinkState::AwaitingAck {
                deadline_ms: issued_ms + timeout_ms,
                accepts,
            };
        }
        match self.framer.state() {
            RxState::Receiving => LinkState::Receiving,
            RxState::Idle | RxState::Discarding => LinkState::Idle,
        }
    }

    /// Ask the link to stop. Later polls and sends fail with
    /// [`LinkError::Closed`].
    pub fn request_exit(&mut self) {
        self.exit_requested = true;
        self.supervisor.cancel();
    }

    pub fn is_exit_requested(&self) -> bool {
        self.exit_requested
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Forget a hang-up after the transport was reopened
    pub fn reconnected(&mut self) {
        self.disconnected = false;
        self.framer.reset();
        self.supervisor.cancel();
    }

    fn transport_failed(&mut self, err: TransportError) -> LinkError {
        if err == TransportError::Disconnected && !self.disconnected {
            log::warn!("transport disconnected");
            self.disconnected = true;
        }
        LinkError::Transport(err)
    }

    /// Yield at most one validated packet.
    ///
    /// Reads one chunk from the transport only when no packet is already
    /// queued. A packet that satisfies the pending exchange clears it and is
    /// still returned to the caller.
    pub fn poll_link(&mut self) -> Result<Option<Packet>, LinkError> {
        if self.exit_requested {
            return Err(LinkError::Closed);
        }

        if !self.framer.has_data() {
            let mut chunk = [0u8; RX_CHUNK_LEN];
            let n = self
                .transport
                .read_available(&mut chunk)
                .map_err(|e| self.transport_failed(e))?;
            if n > 0 {
                self.framer.push_bytes(&chunk[..n])?;
            }
        }

        let packet = self.framer.read();
        if let Some(packet) = &packet {
            if self.supervisor.observe(packet.kind) {
                log::debug!("exchange satisfied by {:?}", packet.kind);
            }
        }
        Ok(packet)
    }

    /// Frame and transmit `packet`, then arm the supervisor if it expects a
    /// reply
    pub fn send_packet(&mut self, packet: &Packet) -> Result<(), LinkError> {
        self.transmit(packet)?;
        self.supervisor.arm(packet, self.clock.now_ms());
        Ok(())
    }

    /// Transmit a packet on behalf of another node. The exchange belongs to
    /// its originator, so the supervisor is left alone.
    pub fn forward_packet(&mut self, packet: &Packet) -> Result<(), LinkError> {
        self.transmit(packet)
    }

    fn transmit(&mut self, packet: &Packet) -> Result<(), LinkError> {
        if self.exit_requested {
            return Err(LinkError::Closed);
        }
        if self.disconnected {
            return Err(LinkError::Transport(TransportError::Disconnected));
        }

        let frame = self.framer.encode(packet)?;
        let expected = frame.len();
        let written = match self.transport.write_all(frame) {
            Ok(written) => written,
            Err(e) => return Err(self.transport_failed(e)),
        };
        if written != expected {
            log::warn!("short write: {} of {} bytes", written, expected);
            return Err(LinkError::ShortWrite { written, expected });
        }

        self.framer.record_tx(expected);
        log::trace!("tx {:?} flags={:#04x} size={}", packet.kind, packet.flags, packet.size());
        Ok(())
    }

    /// Request circuit values; the reply arrives as an UPDATE
    pub fn send_update(
        &mut self,
        flags: UpdateFlags,
        circuits: CircuitMask,
        params: ParamMask,
        timeout: u8,
    ) -> Result<(), LinkError> {
        let packet = build_update_request(flags, circuits, params, timeout)?;
        self.send_packet(&packet)
    }

    pub fn send_command(
        &mut self,
        flags: CommandFlags,
        circuits: CircuitMask,
        values: &[ValueContext],
        timeout: u8,
    ) -> Result<(), LinkError> {
        let packet = build_command(flags, circuits, values, timeout)?;
        self.send_packet(&packet)
    }

    pub fn send_ping(&mut self, ttl: u8, timeout: u8) -> Result<(), LinkError> {
        self.send_packet(&build_ping(ttl, timeout))
    }

    pub fn is_awaiting_ack(&self) -> bool {
        self.supervisor.is_awaiting_ack()
    }

    /// True once per exchange that ran out of time
    pub fn check_timeout(&mut self, now_ms: u64) -> bool {
        self.supervisor.check_timeout(now_ms)
    }
}
