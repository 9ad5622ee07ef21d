//! # Rig Link Protocol Library
//!
//! Packet protocol shared by the gas-rig controller and its host clients:
//!
//! - **Framing**: COBS byte stuffing with a zero delimiter, additive checksum
//! - **Packet Model**: typed header with type-scoped flag bits
//! - **Mask Codec**: circuit/parameter masks plus fixed-point values
//! - **Builder**: value-context driven COMMAND and UPDATE construction
//! - **Link**: cooperative polling, RX ring, acknowledgement supervision
//!
//! ## Architecture
//!
//! ```text
//! Transport bytes ──► Framer ──► PacketRing ──► poll_link() ──► Controller / client
//!                       ▲                            │
//!                       │                       Supervisor
//!                       │                            │
//! Transport bytes ◄── Framer ◄── Builder ◄── send_update / send_command / send_ping
//! ```
//!
//! ## Wire Frame
//!
//! ```text
//! COBS( type | flags | size | timeout | payload ... | checksum ) 0x00
//! ```
//!
//! `size` counts the payload plus the checksum byte. The compact profile drops
//! the timeout byte and the checksum.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(all(test, not(feature = "std")))]
extern crate std;

pub mod buffer;
pub mod builder;
pub mod checksum;
pub mod cobs;
pub mod dispatch;
pub mod error;
pub mod framer;
pub mod link;
pub mod mask;
pub mod packet;
pub mod relay;
pub mod state;
pub mod supervisor;
pub mod traits;

// Re-export main types for convenience
pub use buffer::{BufferError, PacketRing, RX_SLOTS};
pub use builder::{
    build_command, build_ping, build_timeout_status, build_update, build_update_request,
    parse_command, parse_status, parse_update, parse_update_request, val_seek, BuildError,
    CommandBody, Operation, ParamSet, StatusBody, UpdateBody, UpdateRequest, ValueContext,
};
pub use dispatch::{Controller, DispatchError, Replies};
pub use error::{FrameError, LinkError};
pub use framer::{Framer, FramerStats, RxState};
pub use link::{Link, LinkState};
pub use mask::{CircuitMask, MaskError, ParamMask};
pub use packet::{CommandFlags, Packet, PacketType, Profile, StatusFlags, UpdateFlags};
pub use relay::{Relay, RelayTick};
pub use state::{CircuitBank, CircuitSnapshot, SystemState};
pub use supervisor::{AckMask, ExchangeState, Supervisor};
pub use traits::{
    CircuitTable, Clock, ConfigStore, IoTransport, LinkConfig, StoreError, Transport,
    TransportError,
};

/// Library version for protocol compatibility checks
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Largest raw frame: header, payload and checksum
pub const MAX_FRAME_LEN: usize = 255;

/// Largest frame on the wire after COBS, including the delimiter
pub const MAX_ENCODED_FRAME_LEN: usize = cobs::max_encoded_len(MAX_FRAME_LEN);

/// Circuits addressable by a circuit mask
pub const NUM_CIRCUITS: usize = 8;

/// Parameters per circuit addressable by a parameter mask
pub const NUM_PARAMS: usize = 16;
