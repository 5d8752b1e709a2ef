//! Adapter Transport
//!
//! Bluetooth ELM327 adapters show up as RFCOMM serial devices
//! (`/dev/rfcomm0`), USB ones as `/dev/ttyUSB0`; both open the same way.

use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::info;

/// Serial link settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path (e.g., "/dev/rfcomm0" or "COM3")
    pub device: String,
    /// Baud rate (ELM327 clones default to 38400)
    pub baud_rate: u32,
    /// Open timeout in milliseconds
    pub open_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: "/dev/rfcomm0".to_string(),
            baud_rate: 38400,
            open_timeout_ms: 2000,
        }
    }
}

/// Open a serial device as an async duplex byte stream
pub fn open_serial(config: &SerialConfig) -> Result<SerialStream, TransportError> {
    info!("Opening {} at {} baud", config.device, config.baud_rate);
    let stream = tokio_serial::new(config.device.as_str(), config.baud_rate)
        .timeout(Duration::from_millis(config.open_timeout_ms))
        .open_native_async()?;
    Ok(stream)
}
