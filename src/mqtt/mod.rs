pub mod internal_commands;
#[cfg(feature = "ha")]
pub mod ha_interface;

use std::collections::HashMap;
use std::time::Duration;
use lazy_static::lazy_static;
use tokio::sync::RwLock;
use crate::config::MqttConfig;
#[cfg(feature = "ha")]
use crate::mqtt::ha_interface::HaDiscover;
use crate::shutdown::Shutdown;
use log::{debug, error, info, warn};
use tokio::sync::mpsc::{error::TrySendError, Receiver, Sender};
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};

pub struct PublishData {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
}

/// Subscription relative to the base topic, payloads are handed to `sender`
pub struct SubscribeData {
    pub topic: String,
    pub sender: tokio::sync::mpsc::Sender<String>
}

pub enum Transmission {
    #[cfg(feature = "ha")]
    AutoDiscovery(HaDiscover),
    Subscribe(SubscribeData),
    Publish(PublishData)
}

pub fn meter_topic(base: &str, meter: &str, suffix: &str) -> String {
    return format!("{}/{}/{}", base, meter, suffix);
}

fn qos_from(qos: u8) -> QoS {
    return match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    };
}

/// Keeps polling after shutdown so the offline state and the disconnect still go out
async fn drain(eventloop: &mut EventLoop) {
    let pending = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                _ => {}
            }
        }
    };
    let _ = tokio::time::timeout(Duration::from_secs(2), pending).await;
}

pub struct Callbacks {
    calls: HashMap<String, Vec<tokio::sync::mpsc::Sender<String>>>,
}

impl Callbacks {
    pub fn new() -> Self {
        return Callbacks { calls: HashMap::new() };
    }

    pub fn insert(&mut self, topic: String, callback: tokio::sync::mpsc::Sender<String>) {
        debug!("Adding callback for topic {topic}");
        self.calls.entry(topic).or_default().push(callback);
    }

    /// Hands the payload to every callback of the topic without waiting. A callback whose
    /// queue is full loses the message. Returns the number of callbacks reached.
    pub fn send(&self, topic: &str, payload: String) -> usize {
        let calls = match self.calls.get(topic) {
            Some(c) => c,
            None => {
                debug!("Send for unknown topic {topic}");
                return 0;
            }
        };

        let mut delivered = 0;
        for call in calls {
            debug!("Sending to callback: {payload}");
            match call.try_send(payload.clone()) {
                Ok(_) => delivered += 1,
                Err(TrySendError::Full(_)) => warn!("Callback for {topic} is busy, dropping {payload:?}"),
                Err(TrySendError::Closed(_)) => warn!("Callback for {topic} is gone"),
            }
        }
        return delivered;
    }

    pub fn get_topics(&self) -> Vec<String> {
        return self.calls.keys().cloned().collect();
    }
}

lazy_static! {
    pub static ref CALLBACKS: RwLock<Callbacks> = RwLock::new(Callbacks::new());
}

pub struct MqttManager {
    rx: Receiver<Transmission>,
    client: AsyncClient,
    eventloop: Option<EventLoop>,
    base_topic: String,
}

impl MqttManager {
    pub fn new(config: &MqttConfig) -> (Self, Sender<Transmission>) {
        let (mtx, mrx) = tokio::sync::mpsc::channel(100);

        info!("MQTT connection to {}:{} starting up", config.host, config.port);
        let status_topic = format!("{}/status", config.base_topic);
        let mut mqttoptions = MqttOptions::new(config.client_name.clone(), config.host.clone(), config.port);
        mqttoptions.set_keep_alive(Duration::from_secs(5));
        mqttoptions.set_last_will(LastWill::new(status_topic, "offline", QoS::AtLeastOnce, true));
        if !config.user.is_empty() {
            mqttoptions.set_credentials(config.user.clone(), config.pass.clone());
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 10);

        return (MqttManager {
            rx: mrx,
            client,
            eventloop: Some(eventloop),
            base_topic: config.base_topic.clone(),
        }, mtx);
    }

    fn spawn_eventloop(&mut self, mut shutdown: Shutdown) {
        let mut eventloop = match self.eventloop.take() {
            Some(e) => e,
            None => return,
        };

        let reconnect_c = self.client.clone();
        let status_topic = format!("{}/status", self.base_topic);
        tokio::spawn(async move {
            info!("MQTT Eventloop started");
            loop {
                let event = tokio::select! {
                    e = eventloop.poll() => e,
                    _ = shutdown.signalled() => {
                        drain(&mut eventloop).await;
                        break;
                    },
                };

                match event {
                    Ok(Event::Incoming(Packet::Publish(p))) => {
                        let payload = String::from_utf8_lossy(&p.payload).to_string();
                        debug!("Received MQTT message on {} {payload:?}", p.topic);
                        CALLBACKS.read().await.send(&p.topic, payload);
                    },
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected, resubscribing everything");
                        let _ = reconnect_c.publish(status_topic.clone(), QoS::AtLeastOnce, true, "online").await;

                        let topics = CALLBACKS.read().await.get_topics();
                        for topic in topics {
                            let client_clone = reconnect_c.clone();
                            tokio::spawn(async move {
                                if let Err(e) = client_clone.subscribe(topic.clone(), QoS::AtLeastOnce).await {
                                    error!("Resubscribing {topic} failed: {e}");
                                }
                            });
                        }
                    },
                    Ok(_) => {},
                    Err(e) => {
                        error!("Error in MQTT {:?}, reconnecting ", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            info!("MQTT Eventloop stopped");
        });
    }

    pub async fn start_thread(&mut self, mut shutdown: Shutdown) {
        self.spawn_eventloop(shutdown.clone());

        loop {
            let transmission = tokio::select! {
                t = self.rx.recv() => t,
                _ = shutdown.signalled() => break,
            };

            let transmission = match transmission {
                Some(t) => t,
                None => {
                    debug!("Reading returned none, we exit now");
                    break;
                }
            };

            match transmission {
                #[cfg(feature = "ha")]
                Transmission::AutoDiscovery(disc) => {
                    match serde_json::to_string(&disc) {
                        Ok(json) => { let _ = self.client.publish(disc.discover_topic.clone(), QoS::AtLeastOnce, true, json).await; },
                        Err(e) => { error!("Unable to serialize discovery of {}: {e}", disc.get_dev_id()); },
                    }
                },
                Transmission::Subscribe(subscribe_data) => {
                    let topic = format!("{}/{}", self.base_topic, subscribe_data.topic);
                    match self.client.subscribe(topic.clone(), QoS::AtLeastOnce).await {
                        Ok(_) => {
                            CALLBACKS.write().await.insert(topic.clone(), subscribe_data.sender);
                            info!("Registered Callback {topic}");
                        },
                        Err(e) => { error!("Subscribing {topic} failed: {e}"); },
                    }
                },
                Transmission::Publish(publish_data) => {
                    match self.client.publish(
                        publish_data.topic,
                        qos_from(publish_data.qos),
                        publish_data.retain,
                        publish_data.payload
                    ).await {
                        Err(e) => { error!("Error publishing: {}", e); },
                        Ok(_) => { debug!("Published successfully"); }
                    }
                },
            };
        }

        info!("MQTT manager stopping");
        let _ = self.client.publish(format!("{}/status", self.base_topic), QoS::AtLeastOnce, true, "offline").await;
        let _ = self.client.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meter_topic() {
        assert_eq!(meter_topic("peacefair2mqtt", "garage", "command"), "peacefair2mqtt/garage/command");
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos_from(1), QoS::AtLeastOnce);
        assert_eq!(qos_from(2), QoS::ExactlyOnce);
        assert_eq!(qos_from(9), QoS::AtMostOnce);
    }

    #[tokio::test]
    async fn test_callbacks_fan_out() {
        let mut callbacks = Callbacks::new();
        let (tx1, mut rx1) = tokio::sync::mpsc::channel(1);
        let (tx2, mut rx2) = tokio::sync::mpsc::channel(1);
        callbacks.insert("pf/a/command".to_string(), tx1);
        callbacks.insert("pf/a/command".to_string(), tx2);

        assert_eq!(callbacks.send("pf/a/command", "66".to_string()), 2);
        assert_eq!(callbacks.send("pf/b/command", "66".to_string()), 0);

        assert_eq!(rx1.recv().await.as_deref(), Some("66"));
        assert_eq!(rx2.recv().await.as_deref(), Some("66"));
        assert_eq!(callbacks.get_topics(), vec!["pf/a/command".to_string()]);
    }

    #[test]
    fn test_busy_callback_does_not_block() {
        let mut callbacks = Callbacks::new();
        let (tx, mut rx) = tokio::sync::mpsc::channel(10);
        callbacks.insert("pf/a/command".to_string(), tx);

        for _ in 0..10 {
            assert_eq!(callbacks.send("pf/a/command", "66".to_string()), 1);
        }
        assert_eq!(callbacks.send("pf/a/command", "66".to_string()), 0);

        let mut queued = 0;
        while rx.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, 10);
    }

    #[test]
    fn test_closed_callback_is_skipped() {
        let mut callbacks = Callbacks::new();
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        callbacks.insert("pf/a/command".to_string(), tx);
        drop(rx);

        assert_eq!(callbacks.send("pf/a/command", "66".to_string()), 0);
    }
}
