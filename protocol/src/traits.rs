//! # Collaborator Traits
//!
//! The protocol core never touches a serial port, a clock or the circuit
//! table directly. Everything outside the core is reached through the traits
//! in this module:
//!
//! - [`Transport`]: opaque byte stream (serial port, radio bridge, test pipe)
//! - [`Clock`]: millisecond time source for ack deadlines
//! - [`CircuitTable`]: per-circuit parameter values owned by the simulation
//! - [`ConfigStore`]: persistent storage used by the SAVE command
//!
//! [`IoTransport`] adapts any `embedded-io` reader/writer to [`Transport`].

use embedded_io::{ErrorKind, Read, ReadReady, Write};
use serde::{Deserialize, Serialize};

use crate::packet::Profile;
use crate::{NUM_CIRCUITS, NUM_PARAMS};

/// Errors reported by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// The device went away (hang-up, unplugged adapter, closed pipe)
    Disconnected,
    /// Any other I/O failure
    Io,
}

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Raw byte stream underneath a link
pub trait Transport {
    /// Read whatever bytes are available without blocking.
    ///
    /// Returns `Ok(0)` when nothing is pending.
    fn read_available(&mut self, buf: &mut [u8]) -> TransportResult<usize>;

    /// Write `bytes` in a single call and return how many were accepted.
    ///
    /// A short count is not retried here; the link reports it as a failed
    /// transmit.
    fn write_all(&mut self, bytes: &[u8]) -> TransportResult<usize>;
}

/// Millisecond time source
pub trait Clock {
    /// Milliseconds since an arbitrary fixed origin
    fn now_ms(&self) -> u64;
}

/// Circuit parameter values the protocol marshals into and out of packets
pub trait CircuitTable {
    /// Number of circuits actually present (at most [`NUM_CIRCUITS`])
    fn circuit_count(&self) -> usize {
        NUM_CIRCUITS
    }

    /// Number of parameters per circuit (at most [`NUM_PARAMS`])
    fn param_count(&self) -> usize {
        NUM_PARAMS
    }

    fn param(&self, circuit: usize, param: usize) -> f32;

    fn set_param(&mut self, circuit: usize, param: usize, value: f32);
}

/// Errors reported by a configuration store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// Nothing has been saved yet
    Empty,
    /// Stored blob does not fit the provided buffer
    TooLarge,
    /// Stored blob could not be encoded or decoded
    Corrupt,
    /// Underlying storage failed
    Io,
}

/// Persistent storage for a serialized circuit snapshot (EEPROM, flash, file)
pub trait ConfigStore {
    /// Replace the stored blob
    fn save(&mut self, blob: &[u8]) -> Result<(), StoreError>;

    /// Copy the stored blob into `buf` and return its length
    fn load(&mut self, buf: &mut [u8]) -> Result<usize, StoreError>;
}

/// [`Transport`] over any `embedded-io` device
///
/// `read_ready` gates every read so a poll never blocks.
pub struct IoTransport<T> {
    inner: T,
}

impl<T> IoTransport<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

fn map_io_error<E: embedded_io::Error>(err: E) -> TransportError {
    match err.kind() {
        ErrorKind::NotConnected | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => {
            TransportError::Disconnected
        }
        _ => TransportError::Io,
    }
}

impl<T: Read + ReadReady + Write> Transport for IoTransport<T> {
    fn read_available(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        if !self.inner.read_ready().map_err(map_io_error)? {
            return Ok(0);
        }
        self.inner.read(buf).map_err(map_io_error)
    }

    fn write_all(&mut self, bytes: &[u8]) -> TransportResult<usize> {
        let written = self.inner.write(bytes).map_err(map_io_error)?;
        self.inner.flush().map_err(map_io_error)?;
        Ok(written)
    }
}

/// Configuration for one link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Header layout spoken on this link
    pub profile: Profile,
    /// Timeout in seconds written into outgoing exchanges that expect a reply
    pub timeout_secs: u8,
    /// Time-to-live for outgoing pings
    pub ping_ttl: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            profile: Profile::Extended,
            timeout_secs: 2,
            ping_ttl: 4,
        }
    }
}
