//! Configuration for the BMS exporter.

use bms_common::{LoggingConfig, REGISTER_COUNT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
///
/// Every section has defaults matching the reference BMS wiring, so an
/// empty document (or no file at all) is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Serial line settings.
    #[serde(default)]
    pub serial: SerialConfig,

    /// Which device to poll and how often.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Scrape endpoint settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Modbus RTU serial line configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
    #[serde(default = "default_port")]
    pub port: String,
    /// Baud rate (default: 9600)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Data bits (default: 8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Parity (default: none)
    #[serde(default)]
    pub parity: Parity,
    /// Stop bits: 1 or 2 (default: 1)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Read timeout in milliseconds (default: 1000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: Parity::default(),
            stop_bits: default_stop_bits(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl SerialConfig {
    /// Read timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Serial parity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// The polled BMS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device name (used in log lines)
    #[serde(default = "default_device_name")]
    pub name: String,

    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// First input register of the frame
    #[serde(default)]
    pub start_address: u16,

    /// Poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_device_name() -> String {
    "bms".to_string()
}

fn default_unit_id() -> u8 {
    1
}

fn default_poll_interval() -> u64 {
    2
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            unit_id: default_unit_id(),
            start_address: 0,
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl DeviceConfig {
    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Scrape endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to listen on (default: "0.0.0.0:8000").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

/// Routes served next to the metrics path.
pub const STATUS_PATHS: [&str; 2] = ["/health", "/ready"];

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let serial = &self.serial;

        if serial.port.is_empty() {
            return Err(ConfigError::Validation(
                "Serial port cannot be empty".to_string(),
            ));
        }

        if serial.baud_rate == 0 {
            return Err(ConfigError::Validation(
                "baud_rate must be > 0".to_string(),
            ));
        }

        if !(5..=8).contains(&serial.data_bits) {
            return Err(ConfigError::Validation(format!(
                "invalid data_bits {} (use 5-8)",
                serial.data_bits
            )));
        }

        if !(1..=2).contains(&serial.stop_bits) {
            return Err(ConfigError::Validation(format!(
                "invalid stop_bits {} (use 1 or 2)",
                serial.stop_bits
            )));
        }

        if serial.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "timeout_ms must be > 0".to_string(),
            ));
        }

        let device = &self.device;

        if device.name.is_empty() {
            return Err(ConfigError::Validation(
                "Device name cannot be empty".to_string(),
            ));
        }

        if !(1..=247).contains(&device.unit_id) {
            return Err(ConfigError::Validation(format!(
                "Device '{}': unit_id must be 1-247",
                device.name
            )));
        }

        if device.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(format!(
                "Device '{}': poll_interval_secs must be > 0",
                device.name
            )));
        }

        if device.start_address as usize + REGISTER_COUNT > u16::MAX as usize + 1 {
            return Err(ConfigError::Validation(format!(
                "Device '{}': start_address {} leaves no room for {} registers",
                device.name, device.start_address, REGISTER_COUNT
            )));
        }

        // Validate listen address format
        if self.http.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.http.listen
            )));
        }

        // Validate path starts with /
        if !self.http.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }
        if STATUS_PATHS.contains(&self.http.path.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Metrics path {} is already served by a status endpoint",
                self.http.path
            )));
        }
        if self.http.path.contains([':', '*']) {
            return Err(ConfigError::Validation(format!(
                "Metrics path must be a literal route, got {}",
                self.http.path
            )));
        }

        Ok(())
    }
}
