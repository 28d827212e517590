use log::{error, info, warn};
use serde::Deserialize;
use tokio::sync::mpsc::Sender;
use crate::commands::CommandRegistry;
use crate::config::MqttConfig;
use crate::models::CommandDescriptor;
use crate::mqtt::{meter_topic, PublishData, SubscribeData, Transmission};
use crate::peacefair::PeacefairMeter;
use crate::shutdown::Shutdown;

#[derive(Deserialize)]
struct SendCommand {
    send: String,
}

/// Accepts a bare identifier ("66") or a JSON object ({"send": "66"})
pub fn parse_command(payload: &str) -> Option<String> {
    let payload = payload.trim();
    if payload.is_empty() {
        return None;
    }

    if payload.starts_with('{') {
        return match serde_json::from_str::<SendCommand>(payload) {
            Ok(c) if !c.send.trim().is_empty() => Some(c.send.trim().to_string()),
            _ => None,
        };
    }

    return Some(payload.to_string());
}

/// Listens on the command topic of one meter and runs the commands one after the other
pub struct MeterCommandListener {
    sender: Sender<Transmission>,
    meter: String,
    commands: Vec<CommandDescriptor>,
    registry: CommandRegistry,
    base_topic: String,
    ha_enabled: bool,
}

impl MeterCommandListener {
    pub fn new(sender: Sender<Transmission>, meter: &PeacefairMeter, mqtt: &MqttConfig) -> Self {
        return MeterCommandListener {
            sender,
            meter: meter.name().to_string(),
            commands: meter.available_commands(),
            registry: meter.command_registry(),
            base_topic: mqtt.base_topic.clone(),
            ha_enabled: mqtt.ha_enabled,
        };
    }

    async fn publish(&self, suffix: &str, payload: String, retain: bool) {
        let p = Transmission::Publish(PublishData {
            topic: meter_topic(&self.base_topic, &self.meter, suffix),
            payload,
            qos: 1,
            retain,
        });
        let _ = self.sender.send(p).await;
    }

    #[cfg(feature = "ha")]
    async fn announce(&self) {
        use crate::mqtt::ha_interface::{HaComponent, HaDiscover};

        let mut discover = HaDiscover::new(&self.meter, "Peacefair", "PZEM");
        for command in self.commands.iter() {
            for value in command.values() {
                let cmp = HaComponent::new_button(
                    &self.meter,
                    &format!("{} {}", command.label, value),
                    meter_topic(&self.base_topic, &self.meter, "command"),
                    value,
                );
                discover.add(&format!("{}_{}", command.label.replace('.', "_"), value), cmp);
            }
        }
        discover.add("command_problem", HaComponent::new_command_problem(
            &self.meter,
            "command failed",
            meter_topic(&self.base_topic, &self.meter, "command/result"),
        ));

        let _ = self.sender.send(Transmission::AutoDiscovery(discover)).await;
    }

    #[cfg(not(feature = "ha"))]
    async fn announce(&self) {}

    pub async fn start_thread(&self, mut shutdown: Shutdown) {
        info!("Starting command listener for {}", self.meter);
        let (sender, mut receiver) = tokio::sync::mpsc::channel(10);

        let register = Transmission::Subscribe(SubscribeData {
            topic: format!("{}/command", self.meter),
            sender,
        });
        let _ = self.sender.send(register).await;

        match serde_json::to_string(&self.commands) {
            Ok(json) => self.publish("commands", json, true).await,
            Err(e) => error!("Unable to serialize commands of {}: {e}", self.meter),
        }

        if self.ha_enabled {
            self.announce().await;
        }

        info!("Start waiting for command messages of {}", self.meter);
        loop {
            let payload = tokio::select! {
                p = receiver.recv() => p,
                _ = shutdown.signalled() => break,
            };

            let payload = match payload {
                Some(p) => p,
                None => break,
            };

            let command = match parse_command(&payload) {
                Some(c) => c,
                None => {
                    warn!("Ignoring empty or malformed command {payload:?} for {}", self.meter);
                    continue;
                }
            };

            info!("Received command {command} for {}", self.meter);
            let outcome = match self.registry.dispatch(&command, shutdown.clone()).await {
                Ok(o) => o,
                Err(_) => {
                    info!("Command {command} for {} interrupted, stopping", self.meter);
                    break;
                }
            };

            match serde_json::to_string(&outcome) {
                Ok(json) => self.publish("command/result", json, false).await,
                Err(e) => error!("Unable to serialize result of {command}: {e}"),
            }
        }

        info!("Command listener for {} stopped", self.meter);
    }
}
