//! OBD-II Protocol Implementation
//!
//! Request/response client for ELM327-compatible adapters reached over a
//! noisy byte stream (Bluetooth RFCOMM or USB serial). Provides the command
//! set, prompt-delimited frame decoding, per-command response interpretation
//! and a spacing/timeout-enforcing command channel.

mod channel;
mod command;
mod error;
mod frame;
mod response;
mod transport;

pub use channel::{ChannelTiming, CommandChannel, DEFAULT_MIN_SPACING_MS, DEFAULT_READ_TIMEOUT_MS};
pub use command::{Command, InitCommand, CURRENT_DATA, POSITIVE_RESPONSE, TERMINATOR};
pub use error::{ChannelError, ProtocolError, TransportError};
pub use frame::{split_frames, Decoded, FrameDecoder, RawFrame, PROMPT};
pub use response::{interpret, Measurement, STOPPED};
pub use transport::{open_serial, SerialConfig};

/// Re-exported so callers can name the serial stream type
pub use tokio_serial::SerialStream;
