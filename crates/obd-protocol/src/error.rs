//! OBD-II Error Types

use thiserror::Error;

/// Failure of a single command exchange on an open channel
#[derive(Debug, Error)]
pub enum ChannelError {
    /// No prompt seen before the read deadline
    #[error("Timeout waiting for OBD response after {0}ms")]
    Timeout(u64),

    /// Prompt seen but the frame carried no tokens
    #[error("Empty response from adapter")]
    Empty,

    /// Transport write/read failure; fatal to the current connection
    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// Whether this failure must be escalated to the connection supervisor
    pub fn is_transport(&self) -> bool {
        matches!(self, ChannelError::Io(_))
    }
}

/// Well-formed bytes that do not decode to a measurement.
///
/// Always recoverable by retrying the command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Adapter aborted the exchange with `STOPPED`
    #[error("Adapter reported STOPPED")]
    Stopped,

    /// Adapter answered with one of its own error markers
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// Acknowledgment header `41 <pid>` not present in the frame
    #[error("Missing response header 41 {0:02X}")]
    HeaderMismatch(u8),

    /// Fewer data bytes than the decode rule requires
    #[error("Short response: expected {expected} data bytes, got {actual}")]
    Short { expected: usize, actual: usize },

    /// A data token that is not a hex byte pair
    #[error("Invalid hex byte: {0:?}")]
    BadHex(String),

    /// Voltage query answer without a parseable decimal literal
    #[error("Invalid voltage literal: {0:?}")]
    BadVoltage(String),
}

/// Failure to open the adapter transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// Serial / RFCOMM device could not be opened
    #[error("Serial port error: {0}")]
    Serial(String),

    /// I/O failure while setting up the stream
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_serial::Error> for TransportError {
    fn from(err: tokio_serial::Error) -> Self {
        TransportError::Serial(err.to_string())
    }
}
