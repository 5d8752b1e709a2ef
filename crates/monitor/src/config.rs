//! Monitor configuration
//!
//! Loaded from an optional TOML file and `MONITOR__*` environment variables
//! (e.g. `MONITOR__ADAPTER__DEVICE=/dev/rfcomm0`). Every field has a default.

use crash_detector::ClassifierConfig;
use obd_protocol::SerialConfig;
use obd_scheduler::{PollingConfig, SupervisorConfig};
use serde::{Deserialize, Serialize};

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "monitor.toml";

/// Environment variable naming an alternative config file
pub const CONFIG_PATH_ENV: &str = "MONITOR_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Diagnostics adapter link
    pub adapter: SerialConfig,
    /// Connect/reconnect behaviour and channel timing
    pub supervisor: SupervisorConfig,
    /// Poll cycle retry policy and delays
    pub polling: PollingConfig,
    /// Inertial sensor link
    pub sensor: SerialConfig,
    /// Collision thresholds and windows
    pub classifier: ClassifierConfig,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            adapter: SerialConfig::default(),
            supervisor: SupervisorConfig::default(),
            polling: PollingConfig::default(),
            sensor: SerialConfig {
                device: "/dev/rfcomm1".to_string(),
                baud_rate: 115200,
                ..Default::default()
            },
            classifier: ClassifierConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl MonitorConfig {
    /// Load from `path` (missing file is fine) layered with the environment
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("MONITOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Config file path from `MONITOR_CONFIG`, else the default
    pub fn default_path() -> String {
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string())
    }
}
