//! Configuration management for Naiad
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files.

use crate::entity::DeviceVariant;
use crate::error::{NaiadError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Vendor cloud API configuration
    pub cloud: CloudConfig,

    /// MQTT broker configuration
    pub mqtt: MqttConfig,

    /// Configured softener devices
    pub devices: Vec<DeviceConfig>,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Polling interval in seconds
    pub poll_interval_secs: u64,

    /// Minimum verbosity published to the notification topic (1..=3)
    pub notify_level: u8,

    /// Consecutive in-cycle failure budget before the process terminates
    pub max_failures: u32,

    /// Path of the persistent state file
    pub state_file: String,
}

/// Vendor cloud API parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Account user name
    pub username: String,

    /// Account password (hashed before it goes on the wire)
    pub password: String,

    /// API base URL
    pub base_url: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

/// MQTT broker parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker host name or IP
    pub broker: String,

    /// Broker TCP port (1883 plain, 8883 TLS)
    pub port: u16,

    /// Optional broker user name
    pub username: Option<String>,

    /// Optional broker password
    pub password: Option<String>,

    /// Home Assistant discovery topic prefix
    pub discovery_prefix: String,

    /// Availability payload published while running
    pub availability_online: String,

    /// Availability payload published via the last will
    pub availability_offline: String,
}

/// One configured softener device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device name, part of every topic
    pub name: String,

    /// Installation location, the topic root
    pub location: String,

    /// Manufacturer string reported in discovery payloads
    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,

    /// Serial number of the gateway; empty means "match by position in the
    /// cloud response"
    #[serde(default)]
    pub serial_number: String,

    /// Hardware variant
    #[serde(default)]
    pub variant: DeviceVariant,

    /// Sodium-limit policy for output hardness changes
    #[serde(default)]
    pub sodium: SodiumConfig,

    /// Upper slider bounds for the leakage-protection numbers
    #[serde(default)]
    pub limits: SliderLimits,
}

/// Sodium-limit safety policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SodiumConfig {
    /// Whether hardness changes are checked against the sodium limit
    pub check_enabled: bool,

    /// Sodium level of the input water in mg/L
    pub input_mg_l: f64,

    /// Sodium limit value in mg/L (200 is the German default)
    pub limit_mg_l: f64,
}

/// Upper bounds for the settable leakage-protection sliders.
///
/// Tighter bounds than the vendor maxima make the Home Assistant sliders
/// usable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SliderLimits {
    /// Max extraction time in minutes (vendor maximum 600)
    pub extraction_time_min: u32,

    /// Max water flow in L/h (vendor maximum 5000)
    pub max_waterflow_l_h: u32,

    /// Max extraction quantity in liters (vendor maximum 3000)
    pub extraction_quantity_l: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to log file or directory
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

fn default_manufacturer() -> String {
    "Judo".to_string()
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            base_url: "https://www.myjudo.eu/interface/".to_string(),
            timeout_secs: 10,
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "127.0.0.1".to_string(),
            port: 1883,
            username: None,
            password: None,
            discovery_prefix: "homeassistant".to_string(),
            availability_online: "online".to_string(),
            availability_offline: "offline".to_string(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            location: String::new(),
            manufacturer: default_manufacturer(),
            serial_number: String::new(),
            variant: DeviceVariant::default(),
            sodium: SodiumConfig::default(),
            limits: SliderLimits::default(),
        }
    }
}

impl Default for SodiumConfig {
    fn default() -> Self {
        Self {
            check_enabled: false,
            input_mg_l: 30.0,
            limit_mg_l: 200.0,
        }
    }
}

impl Default for SliderLimits {
    fn default() -> Self {
        Self {
            extraction_time_min: 60,
            max_waterflow_l_h: 3000,
            extraction_quantity_l: 500,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/naiad.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cloud: CloudConfig::default(),
            mqtt: MqttConfig::default(),
            devices: Vec::new(),
            logging: LoggingConfig::default(),
            poll_interval_secs: 20,
            notify_level: 2,
            max_failures: 10,
            state_file: "/data/naiad_state.json".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default locations
    pub fn load() -> Result<Self> {
        let default_paths = [
            "naiad_config.yaml",
            "/data/naiad_config.yaml",
            "/etc/naiad/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Err(NaiadError::config(
            "No configuration file found (naiad_config.yaml)",
        ))
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.cloud.username.is_empty() {
            return Err(NaiadError::validation(
                "cloud.username",
                "User name cannot be empty",
            ));
        }

        if self.cloud.password.is_empty() {
            return Err(NaiadError::validation(
                "cloud.password",
                "Password cannot be empty",
            ));
        }

        if self.mqtt.broker.is_empty() {
            return Err(NaiadError::validation(
                "mqtt.broker",
                "Broker address cannot be empty",
            ));
        }

        if self.mqtt.port == 0 {
            return Err(NaiadError::validation(
                "mqtt.port",
                "Port must be greater than 0",
            ));
        }

        if self.devices.is_empty() {
            return Err(NaiadError::validation(
                "devices",
                "At least one device must be configured",
            ));
        }

        for device in &self.devices {
            if device.name.is_empty() {
                return Err(NaiadError::validation("devices.name", "Name cannot be empty"));
            }
            if device.location.is_empty() {
                return Err(NaiadError::validation(
                    "devices.location",
                    "Location cannot be empty",
                ));
            }
            if device.limits.extraction_time_min > 600 {
                return Err(NaiadError::validation(
                    "devices.limits.extraction_time_min",
                    "Vendor maximum is 600 min",
                ));
            }
            if device.limits.max_waterflow_l_h > 5000 {
                return Err(NaiadError::validation(
                    "devices.limits.max_waterflow_l_h",
                    "Vendor maximum is 5000 L/h",
                ));
            }
            if device.limits.extraction_quantity_l > 3000 {
                return Err(NaiadError::validation(
                    "devices.limits.extraction_quantity_l",
                    "Vendor maximum is 3000 L",
                ));
            }
            if device.sodium.check_enabled && device.sodium.limit_mg_l <= device.sodium.input_mg_l {
                return Err(NaiadError::validation(
                    "devices.sodium.limit_mg_l",
                    "Sodium limit must exceed the input level",
                ));
            }
        }

        if !(1..=3).contains(&self.notify_level) {
            return Err(NaiadError::validation(
                "notify_level",
                "Notify level must be between 1 and 3",
            ));
        }

        if self.poll_interval_secs == 0 {
            return Err(NaiadError::validation(
                "poll_interval_secs",
                "Must be greater than 0",
            ));
        }

        if self.max_failures == 0 {
            return Err(NaiadError::validation(
                "max_failures",
                "Must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl DeviceConfig {
    /// Topic the retained state JSON is published to
    pub fn state_topic(&self) -> String {
        format!("{}/{}/state", self.location, self.name)
    }

    /// Topic incoming command JSON arrives on
    pub fn command_topic(&self) -> String {
        format!("{}/{}/command", self.location, self.name)
    }

    /// Topic notifications are published to
    pub fn notification_topic(&self) -> String {
        format!("{}/{}/notify", self.location, self.name)
    }

    /// Per-device availability topic (used when only one device is
    /// configured)
    pub fn availability_topic(&self) -> String {
        format!("{}/{}/status", self.location, self.name)
    }

    /// Client/device identifier used in discovery payloads
    pub fn client_id(&self) -> String {
        format!("{}-{}", self.name, self.location)
    }
}
