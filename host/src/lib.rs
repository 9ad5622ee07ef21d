//! # Rig Host Client Library
//!
//! Host side of the rig link protocol:
//!
//! - Async link task with a channel-based handle ([`spawn_link`])
//! - Non-blocking `std` transport and bounded wait for one-shot tools
//! - Simulated controller for bench tests ([`serve_controller`])
//! - JSON configuration and env_logger setup
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        host application                      │
//! │                                                              │
//! │   LinkHandle ── send / request / stats ──┐                   │
//! │        ▲                                 ▼                   │
//! │        │ LinkEvent              ┌──────────────────┐         │
//! │        └────────────────────────│    link task     │         │
//! │                                 │ Framer+Supervisor│         │
//! │                                 └────────┬─────────┘         │
//! └──────────────────────────────────────────┼───────────────────┘
//!                                            │ COBS frames
//!                                  serial bridge / TCP / duplex
//!                                            │
//!                                   controller (or simulator)
//! ```

pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod store;
pub mod transport;

pub use client::{spawn_link, LinkEvent, LinkHandle, LinkStats, TokioClock};
pub use config::HostConfig;
pub use device::serve_controller;
pub use error::{HostError, Result};
pub use logging::init_logging;
pub use store::{FileStore, MemoryStore};
pub use transport::{wait_reply, StdTransport, SystemClock};
