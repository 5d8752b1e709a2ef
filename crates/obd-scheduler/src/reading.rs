//! Per-cycle aggregate of decoded measurements

use obd_protocol::{Command, Measurement};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Latest measurements from one polling cycle.
///
/// Commands that exhausted their retries are simply absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Cycle sequence number, starting at 1
    pub cycle: u64,
    /// Wall-clock time the cycle completed (Unix ms)
    pub captured_at_ms: u64,
    /// Decoded values keyed by command
    pub measurements: BTreeMap<Command, Measurement>,
}

impl Reading {
    /// Create an empty reading for the given cycle
    pub fn new(cycle: u64) -> Self {
        Self {
            cycle,
            ..Default::default()
        }
    }

    /// Record a measurement under the command it answers
    pub fn insert(&mut self, measurement: Measurement) {
        self.measurements.insert(measurement.command(), measurement);
    }

    pub fn get(&self, command: Command) -> Option<&Measurement> {
        self.measurements.get(&command)
    }

    /// Vehicle speed (km/h)
    pub fn speed(&self) -> Option<u32> {
        match self.get(Command::Speed) {
            Some(Measurement::Speed(v)) => Some(*v),
            _ => None,
        }
    }

    /// Engine RPM
    pub fn rpm(&self) -> Option<u32> {
        match self.get(Command::Rpm) {
            Some(Measurement::Rpm(v)) => Some(*v),
            _ => None,
        }
    }

    /// Coolant temperature (°C)
    pub fn temperature_c(&self) -> Option<i32> {
        match self.get(Command::CoolantTemp) {
            Some(Measurement::TemperatureC(v)) => Some(*v),
            _ => None,
        }
    }

    /// Battery voltage (V)
    pub fn voltage_v(&self) -> Option<f64> {
        match self.get(Command::BatteryVoltage) {
            Some(Measurement::VoltageV(v)) => Some(*v),
            _ => None,
        }
    }

    /// Commands from the cycle with no value this time
    pub fn missing(&self) -> Vec<Command> {
        Command::CYCLE
            .into_iter()
            .filter(|c| !self.measurements.contains_key(c))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Stamp the wall-clock completion time
    pub(crate) fn stamp(&mut self) {
        self.captured_at_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
    }
}
