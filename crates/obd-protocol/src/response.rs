//! Response Interpretation
//!
//! Maps a command and its response frame to a typed measurement.
//!
//! Mode 01 answers carry a two-token acknowledgment header, `41 <pid>`,
//! followed by the data bytes, so the first data byte sits at token index 2
//! relative to the header. The header is searched for rather than assumed at
//! index 0 so a leftover echo line or bus chatter in front of it is skipped.

use crate::command::{Command, CURRENT_DATA, POSITIVE_RESPONSE};
use crate::error::ProtocolError;
use crate::frame::RawFrame;
use serde::{Deserialize, Serialize};

/// Marker the adapter sends when an exchange was aborted
pub const STOPPED: &str = "STOPPED";

/// Other adapter error replies, matched against the whole frame text
const ADAPTER_ERRORS: [&str; 6] = [
    "NO DATA",
    "UNABLE TO CONNECT",
    "CAN ERROR",
    "BUS ERROR",
    "ERROR",
    "?",
];

/// A decoded physical value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Measurement {
    /// Vehicle speed in km/h
    Speed(u32),
    /// Engine revolutions per minute
    Rpm(u32),
    /// Coolant temperature in °C
    TemperatureC(i32),
    /// Battery voltage in volts
    VoltageV(f64),
}

impl Measurement {
    /// Command this measurement answers
    pub fn command(&self) -> Command {
        match self {
            Measurement::Speed(_) => Command::Speed,
            Measurement::Rpm(_) => Command::Rpm,
            Measurement::TemperatureC(_) => Command::CoolantTemp,
            Measurement::VoltageV(_) => Command::BatteryVoltage,
        }
    }
}

impl std::fmt::Display for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Measurement::Speed(v) => write!(f, "{} km/h", v),
            Measurement::Rpm(v) => write!(f, "{} RPM", v),
            Measurement::TemperatureC(v) => write!(f, "{} °C", v),
            Measurement::VoltageV(v) => write!(f, "{:.1} V", v),
        }
    }
}

/// Decode a response frame for `command`.
///
/// Any error here is the "invalid" outcome: the caller retries the command.
pub fn interpret(command: Command, frame: &RawFrame) -> Result<Measurement, ProtocolError> {
    if frame.contains(STOPPED) {
        return Err(ProtocolError::Stopped);
    }
    check_adapter_error(frame)?;

    match command {
        Command::Speed => {
            let data = data_bytes(command, frame)?;
            Ok(Measurement::Speed(u32::from(data[0])))
        }
        Command::Rpm => {
            let data = data_bytes(command, frame)?;
            let raw = u32::from(data[0]) * 256 + u32::from(data[1]);
            Ok(Measurement::Rpm(raw / 4))
        }
        Command::CoolantTemp => {
            let data = data_bytes(command, frame)?;
            Ok(Measurement::TemperatureC(i32::from(data[0]) - 40))
        }
        Command::BatteryVoltage => parse_voltage(frame).map(Measurement::VoltageV),
    }
}

fn check_adapter_error(frame: &RawFrame) -> Result<(), ProtocolError> {
    let text = frame.text().to_ascii_uppercase();
    // Error replies may follow an echoed command line
    let hit = ADAPTER_ERRORS
        .iter()
        .find(|marker| text == **marker || text.ends_with(&format!(" {}", marker)));

    match hit {
        Some(marker) => Err(ProtocolError::Adapter(marker.to_string())),
        None => Ok(()),
    }
}

/// Locate `41 <pid>` and return the data bytes that follow it
fn data_bytes(command: Command, frame: &RawFrame) -> Result<Vec<u8>, ProtocolError> {
    // Only Mode 01 commands reach this point
    let pid = command.pid().unwrap_or_default();
    let expected = command.data_bytes();
    let service = format!("{:02X}", CURRENT_DATA + POSITIVE_RESPONSE);
    let pid_token = format!("{:02X}", pid);

    let tokens = frame.tokens();
    let header = tokens
        .windows(2)
        .position(|w| w[0].eq_ignore_ascii_case(&service) && w[1].eq_ignore_ascii_case(&pid_token))
        .ok_or(ProtocolError::HeaderMismatch(pid))?;

    let data = &tokens[header + 2..];
    if data.len() < expected {
        return Err(ProtocolError::Short {
            expected,
            actual: data.len(),
        });
    }

    data[..expected].iter().map(|t| parse_hex_byte(t)).collect()
}

fn parse_hex_byte(token: &str) -> Result<u8, ProtocolError> {
    if token.len() != 2 || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ProtocolError::BadHex(token.to_string()));
    }
    u8::from_str_radix(token, 16).map_err(|_| ProtocolError::BadHex(token.to_string()))
}

/// Pull the decimal literal out of an `ATRV` answer such as `12.6V`.
///
/// A leading echo of `ATRV` is tolerated but not required.
fn parse_voltage(frame: &RawFrame) -> Result<f64, ProtocolError> {
    let text = frame.text();
    let literal = frame
        .tokens()
        .iter()
        .map(|t| t.as_str())
        .filter(|t| !t.eq_ignore_ascii_case(Command::BatteryVoltage.mnemonic()))
        .find_map(|t| {
            let trimmed = t.trim_end_matches(['V', 'v']);
            if trimmed.len() == t.len() {
                return None;
            }
            trimmed.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
        });

    literal.ok_or(ProtocolError::BadVoltage(text))
}
