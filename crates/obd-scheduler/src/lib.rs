//! OBD-II Polling and Connection Supervision
//!
//! Keeps an ELM327 link alive through a connect/fault state machine and polls
//! a fixed four-command cycle over it, publishing one [`Reading`] per cycle.

mod error;
mod poller;
mod reading;
mod supervisor;

#[cfg(test)]
mod mock;

pub use error::SchedulerError;
pub use poller::{CommandOutcome, PollingConfig, PollingController};
pub use reading::Reading;
pub use supervisor::{
    BackoffProfile, ConnectionState, ConnectionSupervisor, Connector, SerialConnector,
    SupervisorConfig,
};
