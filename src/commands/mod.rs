use std::collections::BTreeMap;
use std::sync::Arc;
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::shutdown::{Cancelled, Shutdown};

/// Result of one command as published back to the caller
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub command: String,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<String>,
}

impl CommandOutcome {
    pub fn rejected(command: &str, message: String) -> Self {
        return CommandOutcome {
            command: command.to_string(),
            success: false,
            message,
            sent: None,
            received: None,
        };
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Runs the command. Failures end up in the outcome, only a shutdown is returned as error.
    async fn handle(&self, command: &str, shutdown: Shutdown) -> Result<CommandOutcome, Cancelled>;
}

/// Maps command identifiers of one meter to their handlers
pub struct CommandRegistry {
    meter: String,
    handlers: BTreeMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new(meter: &str) -> Self {
        return CommandRegistry { meter: meter.to_string(), handlers: BTreeMap::new() };
    }

    pub fn register(&mut self, command: &str, handler: Arc<dyn CommandHandler>) {
        if self.handlers.insert(command.to_string(), handler).is_some() {
            warn!("Handler for command {} of {} replaced", command, self.meter);
        }
    }

    pub fn meter(&self) -> &str {
        return &self.meter;
    }

    pub fn commands(&self) -> Vec<String> {
        return self.handlers.keys().cloned().collect();
    }

    pub async fn dispatch(&self, command: &str, shutdown: Shutdown) -> Result<CommandOutcome, Cancelled> {
        let command = command.trim();

        let handler = match self.handlers.get(command) {
            Some(h) => h.clone(),
            None => {
                warn!("no valid command: {} for {}", command, self.meter);
                return Ok(CommandOutcome::rejected(command, format!("no valid command: {}", command)));
            }
        };

        info!("Running command {} on {}", command, self.meter);
        let outcome = handler.handle(command, shutdown).await?;
        info!("Command {} on {} finished, success: {}", command, self.meter, outcome.success);
        return Ok(outcome);
    }
}
