//! # Circuit and System State
//!
//! The physical meaning of these values belongs to the rig simulation. This
//! module only provides containers the protocol can marshal:
//!
//! - [`CircuitBank`]: a plain in-memory [`CircuitTable`]
//! - [`SystemState`]: the system section of an UPDATE
//! - [`CircuitSnapshot`]: what the SAVE command persists, encoded with postcard

use serde::{Deserialize, Serialize};

use crate::mask::CircuitMask;
use crate::traits::{CircuitTable, ConfigStore, StoreError};
use crate::{NUM_CIRCUITS, NUM_PARAMS};

/// Length of the system section on the wire
pub const SYSTEM_SECTION_LEN: usize = 6;

/// Largest postcard encoding of a [`CircuitSnapshot`]
pub const SNAPSHOT_MAX_LEN: usize = NUM_CIRCUITS * NUM_PARAMS * 4 + 16;

/// System-wide values carried by an UPDATE with the SYSTEM flag
///
/// ```text
/// ┌────────┬──────────────────┬───────────────────────────┐
/// │  Mode  │ Enabled circuits │ Uptime seconds (u32 BE)   │
/// └────────┴──────────────────┴───────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SystemState {
    pub mode: u8,
    pub enabled: CircuitMask,
    pub uptime_secs: u32,
}

impl SystemState {
    pub fn to_bytes(&self) -> [u8; SYSTEM_SECTION_LEN] {
        let up = self.uptime_secs.to_be_bytes();
        [self.mode, self.enabled.bits(), up[0], up[1], up[2], up[3]]
    }

    /// Parse the system section from the start of `src`
    pub fn from_bytes(src: &[u8]) -> Option<Self> {
        match src {
            [mode, enabled, a, b, c, d, ..] => Some(Self {
                mode: *mode,
                enabled: CircuitMask::from_bits(*enabled),
                uptime_secs: u32::from_be_bytes([*a, *b, *c, *d]),
            }),
            _ => None,
        }
    }
}

/// In-memory circuit table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBank {
    circuits: usize,
    params: usize,
    values: [[f32; NUM_PARAMS]; NUM_CIRCUITS],
}

impl CircuitBank {
    /// Table with `circuits` circuits of `params` parameters, all zero
    ///
    /// Counts are clamped to the protocol limits.
    pub fn new(circuits: usize, params: usize) -> Self {
        Self {
            circuits: circuits.min(NUM_CIRCUITS),
            params: params.min(NUM_PARAMS),
            values: [[0.0; NUM_PARAMS]; NUM_CIRCUITS],
        }
    }

    /// Mask of every circuit present
    pub fn all_circuits(&self) -> CircuitMask {
        CircuitMask::first(self.circuits)
    }

    /// Mask of every parameter present
    pub fn all_params(&self) -> crate::mask::ParamMask {
        crate::mask::ParamMask::first(self.params)
    }
}

impl Default for CircuitBank {
    fn default() -> Self {
        Self::new(NUM_CIRCUITS, NUM_PARAMS)
    }
}

impl CircuitTable for CircuitBank {
    fn circuit_count(&self) -> usize {
        self.circuits
    }

    fn param_count(&self) -> usize {
        self.params
    }

    fn param(&self, circuit: usize, param: usize) -> f32 {
        self.values
            .get(circuit)
            .and_then(|row| row.get(param))
            .copied()
            .unwrap_or(0.0)
    }

    fn set_param(&mut self, circuit: usize, param: usize, value: f32) {
        if let Some(slot) = self.values.get_mut(circuit).and_then(|row| row.get_mut(param)) {
            *slot = value;
        }
    }
}

/// Persisted controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub mode: u8,
    pub enabled: CircuitMask,
    pub values: [[f32; NUM_PARAMS]; NUM_CIRCUITS],
}

impl CircuitSnapshot {
    /// Copy every value the table exposes
    pub fn capture<T: CircuitTable + ?Sized>(table: &T, system: &SystemState) -> Self {
        let mut values = [[0.0; NUM_PARAMS]; NUM_CIRCUITS];
        for (c, row) in values.iter_mut().enumerate().take(table.circuit_count()) {
            for (p, slot) in row.iter_mut().enumerate().take(table.param_count()) {
                *slot = table.param(c, p);
            }
        }
        Self {
            mode: system.mode,
            enabled: system.enabled,
            values,
        }
    }

    /// Write the snapshot back into a table and system state
    pub fn restore<T: CircuitTable + ?Sized>(&self, table: &mut T, system: &mut SystemState) {
        for (c, row) in self.values.iter().enumerate().take(table.circuit_count()) {
            for (p, value) in row.iter().enumerate().take(table.param_count()) {
                table.set_param(c, p, *value);
            }
        }
        system.mode = self.mode;
        system.enabled = self.enabled;
    }

    /// Serialize with postcard and hand the blob to `store`
    pub fn save_to<S: ConfigStore + ?Sized>(&self, store: &mut S) -> Result<usize, StoreError> {
        let mut buf = [0u8; SNAPSHOT_MAX_LEN];
        let blob = postcard::to_slice(self, &mut buf).map_err(|_| StoreError::Corrupt)?;
        store.save(blob)?;
        Ok(blob.len())
    }

    /// Load and decode the blob held by `store`
    pub fn load_from<S: ConfigStore + ?Sized>(store: &mut S) -> Result<Self, StoreError> {
        let mut buf = [0u8; SNAPSHOT_MAX_LEN];
        let len = store.load(&mut buf)?;
        postcard::from_bytes(&buf[..len]).map_err(|_| StoreError::Corrupt)
    }
}

/// Lets a command be staged on a snapshot before it reaches the live table
impl CircuitTable for CircuitSnapshot {
    fn param(&self, circuit: usize, param: usize) -> f32 {
        self.values
            .get(circuit)
            .and_then(|row| row.get(param))
            .copied()
            .unwrap_or(0.0)
    }

    fn set_param(&mut self, circuit: usize, param: usize, value: f32) {
        if let Some(slot) = self.values.get_mut(circuit).and_then(|row| row.get_mut(param)) {
            *slot = value;
        }
    }
}
