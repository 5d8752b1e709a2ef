//! JSON-lines output for downstream consumers

use crash_detector::{CollisionEvent, MotionSnapshot};
use obd_scheduler::{ConnectionState, Reading};
use serde::Serialize;
use std::io::Write;

/// One line on stdout
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Output<'a> {
    Reading(&'a Reading),
    Connection(ConnectionState),
    Collision(&'a CollisionEvent),
    Motion(&'a MotionSnapshot),
}

impl Output<'_> {
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Write as a single line and flush
    pub fn write_to<W: Write>(&self, out: &mut W) -> anyhow::Result<()> {
        let line = self.to_line()?;
        writeln!(out, "{}", line)?;
        out.flush()?;
        Ok(())
    }
}

/// Operator input read from stdin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Answer the active alert
    Acknowledge { help_needed: bool },
    /// Recover a faulted adapter link
    Reconnect,
}

impl OperatorCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "help" | "yes" | "y" => Some(Self::Acknowledge { help_needed: true }),
            "ok" | "no" | "n" => Some(Self::Acknowledge { help_needed: false }),
            "reconnect" | "r" => Some(Self::Reconnect),
            _ => None,
        }
    }
}
