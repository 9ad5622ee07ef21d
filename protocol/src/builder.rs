//! # Command and Update Builder
//!
//! Turns parsed user intent into packets and packets back into structured
//! bodies.
//!
//! ## COMMAND Payload
//!
//! Sections appear in ascending flag-bit order. Bit 0 (RESPOND) only lives in
//! the header.
//!
//! ```text
//! MODESET   → mode:u8
//! PARAMSET  → circuit mask:u8, param mask:u16 BE, one value per set param
//! SAVE, GETLOG, DUMPCONFIG → no bytes
//! ```
//!
//! ## Value Contexts
//!
//! Argument parsing produces a flat list of [`ValueContext`]s in typing order.
//! [`val_seek`] finds the runs that belong to one sub-command; PARAMSET
//! values are then sorted by parameter index because the wire order follows
//! the parameter mask bits.

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::error::FrameError;
use crate::mask::{
    self, check_bounds, decode_value, encode_value, read_masks, write_masks, CircuitMask,
    MaskError, ParamMask, Unpacked, MASKS_LEN,
};
use crate::packet::{CommandFlags, Packet, PacketType, StatusFlags, UpdateFlags};
use crate::state::{SystemState, SYSTEM_SECTION_LEN};
use crate::traits::CircuitTable;
use crate::NUM_PARAMS;

/// Most value contexts one command may carry
pub const MAX_VALUE_CONTEXTS: usize = 2 * NUM_PARAMS;

/// Errors while building or parsing packet bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BuildError {
    /// Packet is not of the type the parser handles
    WrongType { expected: PacketType, found: PacketType },
    /// Mask or value section invalid
    Mask(MaskError),
    /// Payload capacity exceeded
    Frame(FrameError),
    /// More value contexts than a command can hold
    TooManyValues,
    /// Payload ended inside a section
    Truncated,
}

impl From<MaskError> for BuildError {
    fn from(e: MaskError) -> Self {
        BuildError::Mask(e)
    }
}

impl From<FrameError> for BuildError {
    fn from(e: FrameError) -> Self {
        BuildError::Frame(e)
    }
}

/// Command sub-feature a value context belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Operation {
    ModeSet,
    ParamSet,
}

/// One parsed `(operation, flag, value)` assignment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueContext {
    pub op: Operation,
    /// Mode or parameter index
    pub flag: u8,
    pub value: f32,
}

impl ValueContext {
    pub const fn new(op: Operation, flag: u8, value: f32) -> Self {
        Self { op, flag, value }
    }

    /// Mode selection
    pub fn mode(mode: u8) -> Self {
        Self::new(Operation::ModeSet, 0, mode as f32)
    }

    /// Parameter assignment
    pub const fn param(param: u8, value: f32) -> Self {
        Self::new(Operation::ParamSet, param, value)
    }
}

/// Advance `cursor` to the next context tagged `op` and return the length of
/// the contiguous run starting there.
///
/// Returns 0 and leaves `cursor` untouched when no such context remains.
pub fn val_seek(contexts: &[ValueContext], cursor: &mut usize, op: Operation) -> usize {
    let rest = contexts.get(*cursor..).unwrap_or(&[]);
    match rest.iter().position(|ctx| ctx.op == op) {
        Some(offset) => {
            *cursor += offset;
            contexts[*cursor..]
                .iter()
                .take_while(|ctx| ctx.op == op)
                .count()
        }
        None => 0,
    }
}

/// Collect every PARAMSET context, ordered by parameter index.
///
/// When a parameter is assigned more than once, the last assignment wins.
fn collect_param_sets(values: &[ValueContext]) -> Result<Vec<(u8, f32), NUM_PARAMS>, BuildError> {
    let mut entries: Vec<(u8, usize, f32), MAX_VALUE_CONTEXTS> = Vec::new();
    let mut cursor = 0;
    loop {
        let run = val_seek(values, &mut cursor, Operation::ParamSet);
        if run == 0 {
            break;
        }
        for (offset, ctx) in values[cursor..cursor + run].iter().enumerate() {
            if ctx.flag as usize >= NUM_PARAMS {
                return Err(MaskError::ParamOutOfRange(ctx.flag).into());
            }
            entries
                .push((ctx.flag, cursor + offset, ctx.value))
                .map_err(|_| BuildError::TooManyValues)?;
        }
        cursor += run;
    }

    // typing position breaks ties so the sort is stable
    entries.sort_unstable_by_key(|(flag, position, _)| (*flag, *position));

    let mut sorted: Vec<(u8, f32), NUM_PARAMS> = Vec::new();
    for (flag, _, value) in entries {
        match sorted.last_mut() {
            Some(last) if last.0 == flag => last.1 = value,
            _ => sorted
                .push((flag, value))
                .map_err(|_| BuildError::TooManyValues)?,
        }
    }
    Ok(sorted)
}

/// Build a COMMAND packet.
///
/// Sections whose flag is set but which have no matching value context are
/// left out and their flag cleared, so the receiver never reads a section
/// that was not written.
pub fn build_command(
    flags: CommandFlags,
    circuits: CircuitMask,
    values: &[ValueContext],
    timeout: u8,
) -> Result<Packet, BuildError> {
    let mut packet = Packet::command(CommandFlags::empty()).with_timeout(timeout);
    let mut header = CommandFlags::empty();
    if flags.contains(CommandFlags::RESPOND) {
        header.insert(CommandFlags::RESPOND);
    }

    for bit in 1..8u8 {
        let section = CommandFlags::from_bits(1 << bit);
        if !flags.contains(section) {
            continue;
        }

        if section == CommandFlags::MODESET {
            let mut cursor = 0;
            if val_seek(values, &mut cursor, Operation::ModeSet) == 0 {
                log::warn!("MODESET requested without a mode value, section dropped");
                continue;
            }
            packet.push(values[cursor].value as u8)?;
        } else if section == CommandFlags::PARAMSET {
            let sorted = collect_param_sets(values)?;
            if sorted.is_empty() {
                log::warn!("PARAMSET requested without parameter values, section dropped");
                continue;
            }
            let mut params = ParamMask::EMPTY;
            for (param, _) in &sorted {
                params.insert(*param as usize)?;
            }
            write_masks(&mut packet, circuits, params)?;
            for (_, value) in &sorted {
                packet.extend(&encode_value(*value))?;
            }
        } else if section == CommandFlags::SAVE
            || section == CommandFlags::GETLOG
            || section == CommandFlags::DUMPCONFIG
        {
            // flag alone carries the request
        } else {
            log::debug!("unassigned command bit {} ignored", bit);
            continue;
        }
        header.insert(section);
    }

    packet.flags = header.bits();
    Ok(packet)
}

/// Build an UPDATE request: masks only, the reply carries the values.
pub fn build_update_request(
    flags: UpdateFlags,
    circuits: CircuitMask,
    params: ParamMask,
    timeout: u8,
) -> Result<Packet, BuildError> {
    let mut packet = Packet::update(flags).with_timeout(timeout);
    if flags.contains(UpdateFlags::CIRCUITS) {
        write_masks(&mut packet, circuits, params)?;
    }
    Ok(packet)
}

/// Build an UPDATE carrying state: system section first, then masked values.
pub fn build_update<T: CircuitTable + ?Sized>(
    flags: UpdateFlags,
    system: &SystemState,
    circuits: CircuitMask,
    params: ParamMask,
    table: &T,
) -> Result<Packet, BuildError> {
    let mut packet = Packet::update(flags);
    if flags.contains(UpdateFlags::SYSTEM) {
        packet.extend(&system.to_bytes())?;
    }
    if flags.contains(UpdateFlags::CIRCUITS) {
        mask::pack_params(&mut packet, circuits, params, table)?;
    }
    Ok(packet)
}

/// Build a STATUS ping carrying a time-to-live
pub fn build_ping(ttl: u8, timeout: u8) -> Packet {
    let mut packet = Packet::status(StatusFlags::PING).with_timeout(timeout);
    // one byte always fits an empty payload
    let _ = packet.push(ttl);
    packet
}

/// Build the STATUS packet a relay sends when an exchange times out
pub fn build_timeout_status() -> Packet {
    Packet::status(StatusFlags::TIMEOUT)
}

fn expect_type(packet: &Packet, expected: PacketType) -> Result<(), BuildError> {
    if packet.kind == expected {
        Ok(())
    } else {
        Err(BuildError::WrongType {
            expected,
            found: packet.kind,
        })
    }
}

/// Values of a PARAMSET section, one per set parameter in ascending order
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSet {
    pub circuits: CircuitMask,
    pub params: ParamMask,
    pub values: Vec<f32, NUM_PARAMS>,
}

impl ParamSet {
    /// Write each parameter value into every selected circuit
    pub fn apply<T: CircuitTable + ?Sized>(&self, table: &mut T) -> Result<(), MaskError> {
        check_bounds(self.circuits, self.params, table)?;
        for circuit in self.circuits.iter() {
            for (param, value) in self.params.iter().zip(self.values.iter()) {
                table.set_param(circuit, param, *value);
            }
        }
        Ok(())
    }
}

/// Decoded COMMAND payload
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandBody {
    pub respond: bool,
    pub mode: Option<u8>,
    pub param_set: Option<ParamSet>,
    pub save: bool,
    pub get_log: bool,
    pub dump_config: bool,
}

/// Parse a COMMAND packet
pub fn parse_command(packet: &Packet) -> Result<CommandBody, BuildError> {
    expect_type(packet, PacketType::Command)?;
    let flags = packet.command_flags();
    let mut body = CommandBody {
        respond: flags.contains(CommandFlags::RESPOND),
        save: flags.contains(CommandFlags::SAVE),
        get_log: flags.contains(CommandFlags::GETLOG),
        dump_config: flags.contains(CommandFlags::DUMPCONFIG),
        ..CommandBody::default()
    };

    let payload = packet.payload.as_slice();
    let mut at = 0;

    if flags.contains(CommandFlags::MODESET) {
        body.mode = Some(*payload.first().ok_or(BuildError::Truncated)?);
        at += 1;
    }

    if flags.contains(CommandFlags::PARAMSET) {
        let section = &payload[at..];
        let (circuits, params) = read_masks(section)?;
        let needed = MASKS_LEN + 2 * params.count();
        if section.len() < needed {
            return Err(BuildError::Truncated);
        }
        let mut values = Vec::new();
        for pair in section[MASKS_LEN..needed].chunks_exact(2) {
            // at most NUM_PARAMS pairs, one per mask bit
            let _ = values.push(decode_value([pair[0], pair[1]]));
        }
        body.param_set = Some(ParamSet {
            circuits,
            params,
            values,
        });
    }

    Ok(body)
}

/// Decoded UPDATE request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRequest {
    pub flags: UpdateFlags,
    pub circuits: CircuitMask,
    pub params: ParamMask,
}

/// Parse an UPDATE request sent by a client
pub fn parse_update_request(packet: &Packet) -> Result<UpdateRequest, BuildError> {
    expect_type(packet, PacketType::Update)?;
    let flags = packet.update_flags();
    let (circuits, params) = if flags.contains(UpdateFlags::CIRCUITS) {
        read_masks(&packet.payload)?
    } else {
        (CircuitMask::EMPTY, ParamMask::EMPTY)
    };
    Ok(UpdateRequest {
        flags,
        circuits,
        params,
    })
}

/// Decoded UPDATE carrying state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateBody {
    pub flags: UpdateFlags,
    pub system: Option<SystemState>,
    pub circuits: Option<Unpacked>,
}

/// Parse an UPDATE sent by the controller and apply its values to `table`
pub fn parse_update<T: CircuitTable + ?Sized>(
    packet: &Packet,
    table: &mut T,
) -> Result<UpdateBody, BuildError> {
    expect_type(packet, PacketType::Update)?;
    let flags = packet.update_flags();
    let payload = packet.payload.as_slice();
    let mut at = 0;

    let system = if flags.contains(UpdateFlags::SYSTEM) {
        let system = SystemState::from_bytes(payload).ok_or(BuildError::Truncated)?;
        at += SYSTEM_SECTION_LEN;
        Some(system)
    } else {
        None
    };

    let circuits = if flags.contains(UpdateFlags::CIRCUITS) {
        Some(mask::unpack_params(&payload[at..], table)?)
    } else {
        None
    };

    Ok(UpdateBody {
        flags,
        system,
        circuits,
    })
}

/// Decoded STATUS payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusBody {
    pub timeout: bool,
    pub ping_ttl: Option<u8>,
}

/// Parse a STATUS packet
pub fn parse_status(packet: &Packet) -> Result<StatusBody, BuildError> {
    expect_type(packet, PacketType::Status)?;
    let flags = packet.status_flags();
    let ping_ttl = if flags.contains(StatusFlags::PING) {
        Some(*packet.payload.first().ok_or(BuildError::Truncated)?)
    } else {
        None
    };
    Ok(StatusBody {
        timeout: flags.contains(StatusFlags::TIMEOUT),
        ping_ttl,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CircuitBank;

    #[test]
    fn test_val_seek_runs() {
        let values = [
            ValueContext::param(3, 1.0),
            ValueContext::param(4, 1.0),
            ValueContext::mode(2),
            ValueContext::param(1, 5.0),
        ];
        let mut cursor = 0;
        assert_eq!(val_seek(&values, &mut cursor, Operation::ParamSet), 2);
        assert_eq!(cursor, 0);

        cursor += 2;
        assert_eq!(val_seek(&values, &mut cursor, Operation::ParamSet), 1);
        assert_eq!(cursor, 3);

        cursor += 1;
        assert_eq!(val_seek(&values, &mut cursor, Operation::ParamSet), 0);
        assert_eq!(cursor, 4);

        let mut cursor = 0;
        assert_eq!(val_seek(&values, &mut cursor, Operation::ModeSet), 1);
        assert_eq!(cursor, 2);

        let mut cursor = 99;
        assert_eq!(val_seek(&values, &mut cursor, Operation::ModeSet), 0);
        assert_eq!(cursor, 99);
    }

    #[test]
    fn test_paramset_sorted_by_index() {
        let values = [
            ValueContext::param(3, 1.0),
            ValueContext::new(Operation::ModeSet, 0, 2.0),
            ValueContext::param(1, 5.0),
        ];
        let packet = build_command(
            CommandFlags::MODESET | CommandFlags::PARAMSET,
            CircuitMask::from_bits(0b1),
            &values,
            0,
        )
        .unwrap();

        assert_eq!(
            packet.command_flags(),
            CommandFlags::MODESET | CommandFlags::PARAMSET
        );
        assert_eq!(
            packet.payload.as_slice(),
            &[2, 0b1, 0x00, 0b1010, 5, 0, 1, 0]
        );
    }

    #[test]
    fn test_repeated_param_last_wins() {
        let values = [
            ValueContext::param(2, 1.0),
            ValueContext::param(0, 4.0),
            ValueContext::param(2, 8.5),
        ];
        let packet =
            build_command(CommandFlags::PARAMSET, CircuitMask::ALL, &values, 0).unwrap();
        assert_eq!(
            packet.payload.as_slice(),
            &[0xFF, 0x00, 0b101, 4, 0, 8, 50]
        );
    }

    #[test]
    fn test_respond_and_flag_only_sections() {
        let packet = build_command(
            CommandFlags::RESPOND | CommandFlags::SAVE | CommandFlags::DUMPCONFIG,
            CircuitMask::EMPTY,
            &[],
            5,
        )
        .unwrap();
        assert_eq!(packet.kind, PacketType::Command);
        assert_eq!(packet.flags, 0b10_1001);
        assert_eq!(packet.timeout, 5);
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn test_missing_values_clear_section() {
        let packet = build_command(
            CommandFlags::MODESET | CommandFlags::PARAMSET | CommandFlags::GETLOG,
            CircuitMask::ALL,
            &[],
            0,
        )
        .unwrap();
        assert_eq!(packet.command_flags(), CommandFlags::GETLOG);
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn test_param_index_out_of_range() {
        let values = [ValueContext::param(NUM_PARAMS as u8, 1.0)];
        assert_eq!(
            build_command(CommandFlags::PARAMSET, CircuitMask::ALL, &values, 0),
            Err(BuildError::Mask(MaskError::ParamOutOfRange(16)))
        );
    }

    #[test]
    fn test_command_parse_inverse() {
        let values = [
            ValueContext::param(6, 12.5),
            ValueContext::mode(4),
            ValueContext::param(2, 0.75),
        ];
        let packet = build_command(
            CommandFlags::RESPOND | CommandFlags::MODESET | CommandFlags::PARAMSET,
            CircuitMask::from_bits(0b110),
            &values,
            2,
        )
        .unwrap();

        let body = parse_command(&packet).unwrap();
        assert!(body.respond);
        assert_eq!(body.mode, Some(4));
        let set = body.param_set.unwrap();
        assert_eq!(set.circuits.bits(), 0b110);
        assert_eq!(set.params.iter().collect::<std::vec::Vec<_>>(), [2, 6]);
        assert_eq!(encode_value(set.values[0]), [0, 75]);
        assert_eq!(encode_value(set.values[1]), [12, 50]);

        let mut bank = CircuitBank::new(3, 8);
        set.apply(&mut bank).unwrap();
        assert_eq!(encode_value(bank.param(1, 6)), [12, 50]);
        assert_eq!(encode_value(bank.param(2, 2)), [0, 75]);
        assert_eq!(bank.param(0, 6), 0.0);
    }

    #[test]
    fn test_parse_command_truncated() {
        let mut packet = Packet::command(CommandFlags::PARAMSET);
        packet.extend(&[0x01, 0x00, 0b11, 5, 0]).unwrap();
        assert_eq!(parse_command(&packet), Err(BuildError::Truncated));

        let packet = Packet::command(CommandFlags::MODESET);
        assert_eq!(parse_command(&packet), Err(BuildError::Truncated));
    }

    #[test]
    fn test_update_request_masks() {
        let packet = build_update_request(
            UpdateFlags::CIRCUITS,
            CircuitMask::from_bits(0b11),
            ParamMask::from_bits(0x0102),
            3,
        )
        .unwrap();
        assert_eq!(packet.payload.as_slice(), &[0b11, 0x01, 0x02]);
        assert_eq!(packet.timeout, 3);

        let request = parse_update_request(&packet).unwrap();
        assert_eq!(request.circuits.bits(), 0b11);
        assert_eq!(request.params.bits(), 0x0102);

        let refresh = build_update_request(UpdateFlags::REFRESH, CircuitMask::ALL, ParamMask::ALL, 0)
            .unwrap();
        assert!(refresh.payload.is_empty());
    }

    #[test]
    fn test_update_with_system_and_values() {
        let mut source = CircuitBank::new(2, 2);
        source.set_param(1, 0, 20.5);
        let system = SystemState {
            mode: 1,
            enabled: CircuitMask::from_bits(0b10),
            uptime_secs: 600,
        };
        let packet = build_update(
            UpdateFlags::SYSTEM | UpdateFlags::CIRCUITS,
            &system,
            CircuitMask::from_bits(0b10),
            ParamMask::from_bits(0b01),
            &source,
        )
        .unwrap();

        let mut sink = CircuitBank::new(2, 2);
        let body = parse_update(&packet, &mut sink).unwrap();
        assert_eq!(body.system, Some(system));
        assert_eq!(body.circuits.unwrap().consumed, 5);
        assert_eq!(encode_value(sink.param(1, 0)), [20, 50]);
    }

    #[test]
    fn test_ping_and_status() {
        let ping = build_ping(3, 2);
        assert_eq!(
            parse_status(&ping).unwrap(),
            StatusBody {
                timeout: false,
                ping_ttl: Some(3)
            }
        );
        assert!(parse_status(&build_timeout_status()).unwrap().timeout);
        assert!(matches!(
            parse_status(&Packet::ack()),
            Err(BuildError::WrongType { .. })
        ));
    }
}
