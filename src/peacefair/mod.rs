use std::sync::Arc;
use log::debug;

use crate::commands::CommandRegistry;
use crate::config::MeterConfig;
use crate::models::{CommandDescriptor, ValueText};
use crate::shutdown::{Cancelled, Shutdown};

pub mod crc;
pub mod frame;
pub mod exchange;
pub mod retry;
pub mod reset;
#[cfg(feature = "probe")]
pub mod probe;

use reset::{ResetCommand, ResetOutcome};

/// Command identifier selecting the energy reset
pub const RESET_COMMAND: &str = "66";
pub const RESET_COMMAND_ID: u32 = 66;

/// A Peacefair PZEM meter on a serial line
pub struct PeacefairMeter {
    config: MeterConfig,
}

impl PeacefairMeter {
    pub fn new(config: MeterConfig) -> Self {
        debug!("instantiate Peacefair meter {} at address {}", config.name, config.address);
        return PeacefairMeter { config };
    }

    pub fn name(&self) -> &str {
        return &self.config.name;
    }

    pub fn config(&self) -> &MeterConfig {
        return &self.config;
    }

    pub fn available_commands(&self) -> Vec<CommandDescriptor> {
        return vec![CommandDescriptor {
            provider: "Peacefair".to_string(),
            label: "peacefair.reset".to_string(),
            options: vec![ValueText::new(RESET_COMMAND, "peacefair.reset.action")],
            id: RESET_COMMAND_ID,
        }];
    }

    pub fn command_registry(&self) -> CommandRegistry {
        let mut registry = CommandRegistry::new(&self.config.name);
        registry.register(RESET_COMMAND, Arc::new(ResetCommand::new(&self.config)));
        return registry;
    }

    pub async fn send_reset(&self, shutdown: Shutdown) -> Result<ResetOutcome, Cancelled> {
        return ResetCommand::new(&self.config).execute(shutdown).await;
    }

    #[cfg(feature = "probe")]
    pub async fn test_connection(&self) -> Result<Vec<u16>, probe::ProbeError> {
        return probe::test_connection(&self.config).await;
    }
}
