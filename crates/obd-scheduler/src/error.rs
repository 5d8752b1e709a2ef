//! Scheduler Error Types

use obd_protocol::ChannelError;
use thiserror::Error;

/// Errors surfaced by the connection supervisor and polling controller
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Connection is faulted; an explicit reconnect is required
    #[error("Connection faulted; reconnect required")]
    Faulted,

    /// No usable channel (not connected yet)
    #[error("Connection not ready")]
    NotReady,

    /// Every connect attempt failed
    #[error("Failed to connect after {attempts} attempts")]
    ConnectFailed { attempts: u8 },

    /// Transport failure during a poll cycle
    #[error("Transport failure: {0}")]
    Transport(#[from] ChannelError),
}
