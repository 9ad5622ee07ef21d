//! Host configuration, loaded from JSON.
//!
//! ```json
//! {
//!   "link": { "profile": "Extended", "timeout_secs": 2, "ping_ttl": 4 },
//!   "poll_interval_ms": 20,
//!   "request_attempts": 3,
//!   "log_level": "debug"
//! }
//! ```
//!
//! Every field is optional.

use std::path::Path;

use log::LevelFilter;
use rig_protocol::LinkConfig;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub link: LinkConfig,
    /// How often the link task checks the ack deadline
    pub poll_interval_ms: u64,
    /// Bytes read from the stream per call
    pub read_chunk: usize,
    /// Longest a frame write may wait for room in the stream
    pub write_timeout_ms: u64,
    /// Depth of the event channel toward the caller
    pub event_capacity: usize,
    /// Sends per `LinkHandle::request` before giving up
    pub request_attempts: u32,
    pub log_level: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            poll_interval_ms: 20,
            read_chunk: 256,
            write_timeout_ms: 500,
            event_capacity: 32,
            request_attempts: 3,
            log_level: "info".to_string(),
        }
    }
}

impl HostConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parsed log level, `Info` when unrecognised
    pub fn log_filter(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or(LevelFilter::Info)
    }
}
