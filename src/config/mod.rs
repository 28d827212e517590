use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_yml;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const CONFIG_LOCATIONS: [&str; 2] = ["config/pf2m.yaml", "pf2m.yaml"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no config found, tried {0}")]
    NotFound(String),
    #[error("unable to read {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("unable to parse config: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn mqtt_client_name_default() -> String { return "peacefair2mqtt".to_string() }
fn mqtt_base_topic_default() -> String { return "peacefair2mqtt".to_string() }
fn mqtt_ha_enabled_default() -> bool { return true }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default="mqtt_client_name_default")]
    pub client_name: String,
    #[serde(default="mqtt_base_topic_default")]
    pub base_topic: String,
    #[serde(default="mqtt_ha_enabled_default")]
    pub ha_enabled: bool,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SerialParity {
    #[default]
    None,
    Odd,
    Even,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SerialStopBits {
    One,
    #[default]
    Two,
}

fn serial_baudrate_default() -> u32 { return 9600 }
fn serial_data_bits_default() -> u8 { return 8 }
fn serial_read_timeout_default() -> u64 { return 1000 }

/// Line settings of the RS485 adapter the meter hangs on. Defaults match the
/// factory settings of the PZEM meters: 9600 baud, 8N2.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct SerialConfig {
    pub port: String,
    #[serde(default="serial_baudrate_default")]
    pub baudrate: u32,
    #[serde(default="serial_data_bits_default")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: SerialParity,
    #[serde(default)]
    pub stop_bits: SerialStopBits,
    #[serde(default="serial_read_timeout_default")]
    pub read_timeout_ms: u64,
}

impl SerialConfig {
    pub fn with_port(port: &str) -> Self {
        return SerialConfig {
            port: port.to_string(),
            baudrate: serial_baudrate_default(),
            data_bits: serial_data_bits_default(),
            parity: SerialParity::default(),
            stop_bits: SerialStopBits::default(),
            read_timeout_ms: serial_read_timeout_default(),
        };
    }

    pub fn read_timeout(&self) -> Duration {
        return Duration::from_millis(self.read_timeout_ms);
    }
}

fn retry_attempts_default() -> u32 { return 3 }
fn retry_delay_default() -> u64 { return 500 }

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct RetryConfig {
    #[serde(default="retry_attempts_default")]
    pub attempts: u32,
    #[serde(default="retry_delay_default")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        return RetryConfig { attempts: retry_attempts_default(), delay_ms: retry_delay_default() };
    }
}

fn meter_address_default() -> u8 { return 1 }

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct MeterConfig {
    pub name: String,
    #[serde(default="meter_address_default")]
    pub address: u8,
    pub serial: SerialConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl MeterConfig {
    /// Default provider setting for a meter on the given port
    pub fn with_port(name: &str, port: &str) -> Self {
        return MeterConfig {
            name: name.to_string(),
            address: meter_address_default(),
            serial: SerialConfig::with_port(port),
            retry: RetryConfig::default(),
        };
    }
}

fn meters_default() -> Vec<MeterConfig> { return Vec::new() }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
    pub mqtt: MqttConfig,
    #[serde(default="meters_default")]
    pub meters: Vec<MeterConfig>,
}

impl Config {
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yml::from_str(contents)?;
        config.validate()?;
        return Ok(config);
    }

    /// Loads the given file or, without one, the first file found in the default locations
    pub fn load(path: Option<&Path>) -> Result<(Self, PathBuf), ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let found = CONFIG_LOCATIONS.iter().map(PathBuf::from).find(|p| p.is_file());
                match found {
                    Some(p) => p,
                    None => return Err(ConfigError::NotFound(CONFIG_LOCATIONS.join(", "))),
                }
            }
        };

        debug!("Reading config from {}", path.display());
        let contents = fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;

        let config = Config::from_yaml(&contents)?;
        info!("Loaded {} meter(s) from {}", config.meters.len(), path.display());
        return Ok((config, path));
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();

        for meter in self.meters.iter() {
            if meter.name.trim().is_empty() {
                return Err(ConfigError::Invalid("meter without a name".to_string()));
            }
            if !names.insert(meter.name.as_str()) {
                return Err(ConfigError::Invalid(format!("meter {} configured twice", meter.name)));
            }
            if meter.serial.port.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("meter {} has no serial port", meter.name)));
            }
            if meter.serial.baudrate == 0 {
                return Err(ConfigError::Invalid(format!("meter {} has a baudrate of 0", meter.name)));
            }
            if !(5..=8).contains(&meter.serial.data_bits) {
                return Err(ConfigError::Invalid(format!("meter {} uses {} data bits", meter.name, meter.serial.data_bits)));
            }
            if meter.retry.attempts == 0 {
                return Err(ConfigError::Invalid(format!("meter {} needs at least one attempt", meter.name)));
            }
        }

        return Ok(());
    }

    pub fn meter(&self, name: &str) -> Option<&MeterConfig> {
        return self.meters.iter().find(|m| m.name == name);
    }
}
