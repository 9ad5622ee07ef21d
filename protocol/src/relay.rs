//! # Relay
//!
//! Radio bridge configuration: packets from the original sender (upstream)
//! go to the device (downstream) and replies come back, all unchanged except
//! for the ping time-to-live.
//!
//! ```text
//!  sender ◄──upstream link──► Relay ◄──downstream link──► device
//!                               │
//!            downstream timeout └──► STATUS/TIMEOUT upstream
//! ```
//!
//! A ping that arrives with TTL 0 is answered here instead of forwarded.
//! Only the downstream link tracks exchanges; replies heading upstream are
//! forwarded without arming the upstream supervisor.

use crate::builder::{build_ping, build_timeout_status};
use crate::error::LinkError;
use crate::link::Link;
use crate::packet::{PacketType, StatusFlags};
use crate::traits::{Clock, LinkConfig, Transport};

/// What one [`Relay::poll`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayTick {
    /// A packet went toward the device
    pub to_device: bool,
    /// A packet went toward the sender
    pub to_sender: bool,
    /// A local ping reply was sent
    pub answered_ping: bool,
    /// The downstream exchange expired and the sender was told
    pub timed_out: bool,
}

pub struct Relay<U, D, C> {
    upstream: Link<U, C>,
    downstream: Link<D, C>,
}

impl<U: Transport, D: Transport, C: Clock + Clone> Relay<U, D, C> {
    pub fn new(
        upstream: U,
        downstream: D,
        clock: C,
        upstream_config: LinkConfig,
        downstream_config: LinkConfig,
    ) -> Self {
        Self {
            upstream: Link::new(upstream, clock.clone(), upstream_config),
            downstream: Link::new(downstream, clock, downstream_config),
        }
    }

    pub fn upstream(&mut self) -> &mut Link<U, C> {
        &mut self.upstream
    }

    pub fn downstream(&mut self) -> &mut Link<D, C> {
        &mut self.downstream
    }

    /// One cooperative tick: at most one packet each way, then the timeout
    /// check.
    pub fn poll(&mut self) -> Result<RelayTick, LinkError> {
        let mut tick = RelayTick::default();

        if let Some(mut packet) = self.upstream.poll_link()? {
            let ping_ttl = if packet.kind == PacketType::Status
                && packet.status_flags().contains(StatusFlags::PING)
            {
                packet.payload.first_mut()
            } else {
                None
            };

            match ping_ttl {
                Some(ttl) if *ttl == 0 => {
                    log::debug!("ping expired at relay, answering locally");
                    self.upstream.send_packet(&build_ping(0, 0))?;
                    tick.answered_ping = true;
                }
                Some(ttl) => {
                    *ttl -= 1;
                    self.downstream.send_packet(&packet)?;
                    tick.to_device = true;
                }
                None => {
                    self.downstream.send_packet(&packet)?;
                    tick.to_device = true;
                }
            }
        }

        if let Some(packet) = self.downstream.poll_link()? {
            self.upstream.forward_packet(&packet)?;
            tick.to_sender = true;
        }

        let now = self.downstream.now_ms();
        if self.downstream.check_timeout(now) {
            log::warn!("device did not answer, reporting timeout upstream");
            self.upstream.send_packet(&build_timeout_status())?;
            tick.timed_out = true;
        }

        Ok(tick)
    }

    /// Stop both links
    pub fn request_exit(&mut self) {
        self.upstream.request_exit();
        self.downstream.request_exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::parse_status;
    use crate::link::tests::{frame, written, Pipe, TestClock};
    use crate::packet::{CommandFlags, Packet, UpdateFlags};

    type TestRelay = Relay<Pipe, Pipe, TestClock>;

    fn relay() -> (TestRelay, TestClock) {
        let clock = TestClock::default();
        let relay = Relay::new(
            Pipe::default(),
            Pipe::default(),
            clock.clone(),
            LinkConfig::default(),
            LinkConfig::default(),
        );
        (relay, clock)
    }

    #[test]
    fn test_command_forwarded_and_reply_returned() {
        let (mut relay, _) = relay();
        let command = Packet::command(CommandFlags::RESPOND | CommandFlags::SAVE).with_timeout(2);
        relay.upstream().transport_mut().rx.extend(frame(&command));

        let tick = relay.poll().unwrap();
        assert!(tick.to_device);
        assert_eq!(written(relay.downstream().transport_mut()), [command]);
        assert!(relay.downstream().is_awaiting_ack());

        relay.downstream().transport_mut().rx.extend(frame(&Packet::ack()));
        let tick = relay.poll().unwrap();
        assert!(tick.to_sender);
        assert!(!relay.downstream().is_awaiting_ack());
        assert_eq!(written(relay.upstream().transport_mut()), [Packet::ack()]);
    }

    #[test]
    fn test_device_update_does_not_arm_upstream() {
        let (mut relay, clock) = relay();
        let update = Packet::update(UpdateFlags::SYSTEM).with_timeout(2);
        relay.downstream().transport_mut().rx.extend(frame(&update));

        assert!(relay.poll().unwrap().to_sender);
        assert!(!relay.upstream().is_awaiting_ack());
        assert_eq!(written(relay.upstream().transport_mut()), [update]);

        clock.set(5_000);
        assert!(!relay.upstream().check_timeout(5_000));
        assert_eq!(relay.poll().unwrap(), RelayTick::default());
    }

    #[test]
    fn test_ping_ttl_decremented() {
        let (mut relay, _) = relay();
        relay.upstream().transport_mut().rx.extend(frame(&build_ping(3, 0)));
        relay.poll().unwrap();

        let forwarded = written(relay.downstream().transport_mut());
        assert_eq!(parse_status(&forwarded[0]).unwrap().ping_ttl, Some(2));
    }

    #[test]
    fn test_expired_ping_answered_locally() {
        let (mut relay, _) = relay();
        relay.upstream().transport_mut().rx.extend(frame(&build_ping(0, 0)));

        let tick = relay.poll().unwrap();
        assert!(tick.answered_ping);
        assert!(!tick.to_device);
        assert!(written(relay.downstream().transport_mut()).is_empty());
        assert_eq!(
            parse_status(&written(relay.upstream().transport_mut())[0])
                .unwrap()
                .ping_ttl,
            Some(0)
        );
    }

    #[test]
    fn test_downstream_timeout_reported_upstream() {
        let (mut relay, clock) = relay();
        relay.upstream().transport_mut().rx.extend(frame(&build_ping(2, 1)));
        relay.poll().unwrap();
        written(relay.downstream().transport_mut());

        clock.set(999);
        assert!(!relay.poll().unwrap().timed_out);
        clock.set(1_000);
        assert!(relay.poll().unwrap().timed_out);
        assert!(!relay.poll().unwrap().timed_out);

        let upstream = written(relay.upstream().transport_mut());
        assert_eq!(upstream.len(), 1);
        assert!(parse_status(&upstream[0]).unwrap().timeout);
    }
}
