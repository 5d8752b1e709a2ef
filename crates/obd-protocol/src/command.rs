//! Diagnostic Commands
//!
//! The fixed set of requests the monitor issues, with their ELM327 mnemonics.

use serde::{Deserialize, Serialize};

/// Command terminator expected by the adapter
pub const TERMINATOR: &str = "\r";

/// Mode 01 (current data) service byte
pub const CURRENT_DATA: u8 = 0x01;

/// Positive response offset added to the service byte (`0x01` -> `0x41`)
pub const POSITIVE_RESPONSE: u8 = 0x40;

/// Measurement requests polled every cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Vehicle speed (PID 0x0D)
    Speed,
    /// Engine RPM (PID 0x0C)
    Rpm,
    /// Engine coolant temperature (PID 0x05)
    CoolantTemp,
    /// Adapter-measured battery voltage (`ATRV`)
    BatteryVoltage,
}

impl Command {
    /// Poll order; some adapters rate-limit per command so this is fixed
    pub const CYCLE: [Command; 4] = [
        Command::Speed,
        Command::Rpm,
        Command::CoolantTemp,
        Command::BatteryVoltage,
    ];

    /// ASCII mnemonic without terminator
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Command::Speed => "010D",
            Command::Rpm => "010C",
            Command::CoolantTemp => "0105",
            Command::BatteryVoltage => "ATRV",
        }
    }

    /// Mode 01 PID byte, `None` for adapter-local queries
    pub fn pid(&self) -> Option<u8> {
        match self {
            Command::Speed => Some(0x0D),
            Command::Rpm => Some(0x0C),
            Command::CoolantTemp => Some(0x05),
            Command::BatteryVoltage => None,
        }
    }

    /// Number of data bytes following the `41 <pid>` header
    pub fn data_bytes(&self) -> usize {
        match self {
            Command::Rpm => 2,
            Command::Speed | Command::CoolantTemp => 1,
            Command::BatteryVoltage => 0,
        }
    }

    /// Bytes put on the wire
    pub fn wire(&self) -> String {
        format!("{}{}", self.mnemonic(), TERMINATOR)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Adapter set-up commands sent once after the link opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitCommand {
    /// Full adapter reset
    Reset,
    /// Disable command echo
    EchoOff,
}

impl InitCommand {
    /// Sent in this order
    pub const SEQUENCE: [InitCommand; 2] = [InitCommand::Reset, InitCommand::EchoOff];

    /// ASCII mnemonic without terminator
    pub fn mnemonic(&self) -> &'static str {
        match self {
            InitCommand::Reset => "ATZ",
            InitCommand::EchoOff => "ATE0",
        }
    }

    /// Bytes put on the wire
    pub fn wire(&self) -> String {
        format!("{}{}", self.mnemonic(), TERMINATOR)
    }
}
