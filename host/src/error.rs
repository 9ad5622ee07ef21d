use rig_protocol::LinkError;
use thiserror::Error;

/// Errors surfaced by the host client
#[derive(Error, Debug)]
pub enum HostError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("link error: {0}")]
    Link(#[from] LinkError),
    #[error("device disconnected")]
    Disconnected,
    #[error("link task has stopped")]
    Closed,
    #[error("packet does not expect a reply")]
    NoReplyExpected,
    #[error("no reply after {attempts} attempts")]
    RequestTimeout { attempts: u32 },
}

pub type Result<T> = std::result::Result<T, HostError>;
