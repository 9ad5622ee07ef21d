//! # Controller Dispatch
//!
//! The device side of the protocol: answers UPDATE requests from its circuit
//! table, applies COMMANDs, persists snapshots and echoes pings.
//!
//! | Received                   | Reply                                       |
//! |----------------------------|---------------------------------------------|
//! | UPDATE request             | UPDATE(s) with the requested values         |
//! | COMMAND + DUMPCONFIG       | UPDATE(s) with system section and all values|
//! | COMMAND + RESPOND          | ACK                                         |
//! | STATUS + PING              | STATUS + PING with the same TTL             |
//! | ACK, STATUS + TIMEOUT      | nothing                                     |
//!
//! A full table does not fit one packet, so value replies are split into
//! circuit groups.

use heapless::Vec;

use crate::builder::{
    build_ping, build_update, parse_command, parse_status, parse_update_request, BuildError,
};
use crate::error::LinkError;
use crate::link::Link;
use crate::mask::{check_bounds, split_circuits, CircuitMask, MaskError, ParamMask};
use crate::packet::{Packet, PacketType, Profile, UpdateFlags};
use crate::state::{CircuitBank, CircuitSnapshot, SystemState, SYSTEM_SECTION_LEN};
use crate::traits::{CircuitTable, Clock, ConfigStore, StoreError, Transport};
use crate::NUM_CIRCUITS;

/// Most packets one request can produce
pub const MAX_REPLIES: usize = NUM_CIRCUITS + 1;

pub type Replies = Vec<Packet, MAX_REPLIES>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DispatchError {
    Build(BuildError),
    Store(StoreError),
}

impl From<BuildError> for DispatchError {
    fn from(e: BuildError) -> Self {
        DispatchError::Build(e)
    }
}

impl From<MaskError> for DispatchError {
    fn from(e: MaskError) -> Self {
        DispatchError::Build(BuildError::Mask(e))
    }
}

impl From<StoreError> for DispatchError {
    fn from(e: StoreError) -> Self {
        DispatchError::Store(e)
    }
}

pub struct Controller<S, T = CircuitBank> {
    table: T,
    system: SystemState,
    store: S,
    profile: Profile,
}

impl<S: ConfigStore, T: CircuitTable> Controller<S, T> {
    pub fn new(table: T, store: S, profile: Profile) -> Self {
        Self {
            table,
            system: SystemState::default(),
            store,
            profile,
        }
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut T {
        &mut self.table
    }

    pub fn system(&self) -> &SystemState {
        &self.system
    }

    pub fn system_mut(&mut self) -> &mut SystemState {
        &mut self.system
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply the snapshot held by the store
    pub fn restore(&mut self) -> Result<(), StoreError> {
        CircuitSnapshot::load_from(&mut self.store)?.restore(&mut self.table, &mut self.system);
        Ok(())
    }

    fn every_circuit(&self) -> CircuitMask {
        CircuitMask::first(self.table.circuit_count())
    }

    fn every_param(&self) -> ParamMask {
        ParamMask::first(self.table.param_count())
    }

    /// UPDATE packets carrying the system section (if flagged) and the
    /// values selected by the masks
    fn value_updates(
        &self,
        flags: UpdateFlags,
        circuits: CircuitMask,
        params: ParamMask,
    ) -> Result<Replies, DispatchError> {
        let mut replies = Replies::new();
        let with_values = !circuits.is_empty() && !params.is_empty();
        let budget = self.profile.max_payload() - SYSTEM_SECTION_LEN;

        let groups = if with_values {
            split_circuits(circuits, params, budget)
        } else {
            Vec::new()
        };

        if groups.is_empty() {
            let mut head = flags;
            head.remove(UpdateFlags::CIRCUITS);
            let packet = build_update(head, &self.system, circuits, params, &self.table)?;
            let _ = replies.push(packet);
            return Ok(replies);
        }

        for (i, group) in groups.iter().enumerate() {
            let mut group_flags = flags | UpdateFlags::CIRCUITS;
            if i > 0 {
                group_flags.remove(UpdateFlags::SYSTEM);
            }
            let packet = build_update(group_flags, &self.system, *group, params, &self.table)?;
            // at most NUM_CIRCUITS groups
            let _ = replies.push(packet);
        }
        Ok(replies)
    }

    /// Process one received packet and return what to send back
    pub fn handle(&mut self, packet: &Packet) -> Result<Replies, DispatchError> {
        match packet.kind {
            PacketType::Update => {
                let request = parse_update_request(packet)?;
                let (mut flags, circuits, params) =
                    if request.flags.contains(UpdateFlags::REFRESH) {
                        (
                            UpdateFlags::SYSTEM | UpdateFlags::CIRCUITS,
                            self.every_circuit(),
                            self.every_param(),
                        )
                    } else {
                        (request.flags, request.circuits, request.params)
                    };
                flags.remove(UpdateFlags::REFRESH);
                flags.remove(UpdateFlags::REMOVE);
                flags.remove(UpdateFlags::REMOTE);
                self.value_updates(flags, circuits, params)
            }
            PacketType::Command => {
                let body = parse_command(packet)?;
                if let Some(set) = &body.param_set {
                    check_bounds(set.circuits, set.params, &self.table)?;
                }

                // nothing below may fail once live state is touched
                if body.save {
                    let mut staged = CircuitSnapshot::capture(&self.table, &self.system);
                    if let Some(mode) = body.mode {
                        staged.mode = mode;
                    }
                    if let Some(set) = &body.param_set {
                        set.apply(&mut staged)?;
                    }
                    let len = staged.save_to(&mut self.store)?;
                    log::info!("configuration saved ({} bytes)", len);
                }
                if let Some(mode) = body.mode {
                    log::info!("mode set to {}", mode);
                    self.system.mode = mode;
                }
                if let Some(set) = &body.param_set {
                    set.apply(&mut self.table)?;
                }
                if body.get_log {
                    log::debug!("log requested, storage is external");
                }

                if body.dump_config {
                    self.value_updates(
                        UpdateFlags::SYSTEM | UpdateFlags::CIRCUITS,
                        self.every_circuit(),
                        self.every_param(),
                    )
                } else if body.respond {
                    let mut replies = Replies::new();
                    let _ = replies.push(Packet::ack());
                    Ok(replies)
                } else {
                    Ok(Replies::new())
                }
            }
            PacketType::Status => {
                let status = parse_status(packet)?;
                let mut replies = Replies::new();
                if let Some(ttl) = status.ping_ttl {
                    let _ = replies.push(build_ping(ttl, 0));
                }
                if status.timeout {
                    log::warn!("peer reported an exchange timeout");
                }
                Ok(replies)
            }
            PacketType::Ack => Ok(Replies::new()),
        }
    }

    /// Disable circuits and build the UPDATE announcing it
    pub fn disable_circuits(&mut self, circuits: CircuitMask) -> Result<Packet, DispatchError> {
        for circuit in circuits.iter() {
            self.system.enabled.remove(circuit);
        }
        Ok(build_update(
            UpdateFlags::SYSTEM | UpdateFlags::REMOVE,
            &self.system,
            circuits,
            ParamMask::EMPTY,
            &self.table,
        )?)
    }

    /// Poll `link` once and answer what arrived.
    ///
    /// A packet the controller cannot process is dropped with a warning; the
    /// sender's own timeout covers it. Returns whether a packet was handled.
    pub fn service<L: Transport, C: Clock, const N: usize>(
        &mut self,
        link: &mut Link<L, C, N>,
    ) -> Result<bool, LinkError> {
        let Some(packet) = link.poll_link()? else {
            return Ok(false);
        };
        match self.handle(&packet) {
            Ok(replies) => {
                for reply in &replies {
                    link.send_packet(reply)?;
                }
            }
            Err(e) => log::warn!("dropping {:?} packet: {:?}", packet.kind, e),
        }
        Ok(true)
    }
}
