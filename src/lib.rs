//! Peacefair meter bridge library
//!
//! This library talks to Peacefair PZEM energy meters on a serial line, resets
//! their energy counters on request and exposes the commands via MQTT.

pub mod config;
pub mod models;
pub mod shutdown;
pub mod serial;
pub mod peacefair;
pub mod commands;
pub mod mqtt;

// Re-export common types for easier access
pub use config::{Config, ConfigError, MeterConfig};
pub use models::{CommandDescriptor, ValueText};
pub use peacefair::PeacefairMeter;
pub use peacefair::reset::{ResetOutcome, ResetStatus};
pub use commands::{CommandOutcome, CommandRegistry};
pub use mqtt::MqttManager;
pub use shutdown::{Cancelled, Shutdown};
