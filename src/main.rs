use peacefair2mqtt::{mqtt::{internal_commands::MeterCommandListener, MqttManager}, shutdown, Config, PeacefairMeter};
use tokio::task::JoinHandle;
use std::path::PathBuf;
use log::{error, info};

#[cfg(feature = "probe")]
async fn probe(meter: &PeacefairMeter) {
    match meter.test_connection().await {
        Ok(values) => info!("Meter {} answered the connection test: {:?}", meter.name(), values),
        Err(e) => error!("Connection test of meter {} failed: {e}", meter.name()),
    }
}

#[cfg(not(feature = "probe"))]
async fn probe(_meter: &PeacefairMeter) {}

#[tokio::main]
async fn main() {
    // Initialize logging
    let default_filter = std::env::var("PF2M_LOG_LEVEL").unwrap_or("info".to_string());
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    let explicit = std::env::args().nth(1).map(PathBuf::from);
    let (config, path) = match Config::load(explicit.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("Unable to load configuration: {e}");
            std::process::exit(1);
        }
    };
    info!("Configuration loaded from {}", path.display());

    let (trigger, shutdown) = shutdown::channel();
    let (mut mqtt, tx) = MqttManager::new(&config.mqtt);

    let mut threads: Vec<JoinHandle<()>> = Vec::new();

    let mqtt_shutdown = shutdown.clone();
    threads.push(tokio::spawn(async move {
        mqtt.start_thread(mqtt_shutdown).await;
    }));

    for meter_config in config.meters.iter() {
        let meter = PeacefairMeter::new(meter_config.clone());

        /* Check the line once, a failing probe does not stop the listener */
        probe(&meter).await;

        let listener = MeterCommandListener::new(tx.clone(), &meter, &config.mqtt);
        let listener_shutdown = shutdown.clone();
        threads.push(tokio::spawn(async move {
            listener.start_thread(listener_shutdown).await;
        }));
    }
    drop(tx);

    info!("All modules started, now waiting for a signal to exit");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for the shutdown signal: {e}");
    }

    info!("Shutting down");
    trigger.trigger();
    for task in threads {
        let _ = task.await;
    }
}
