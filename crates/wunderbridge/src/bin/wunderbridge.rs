//! Weather Underground bridge binary

use std::sync::Arc;

use wunderbridge::bus::{self, MqttBus};
use wunderbridge::config::{Args, Config};
use wunderbridge::metrics::{self, WeatherMetrics};
use wunderbridge::scheduler::Bridge;
use wunderbridge::shutdown::setup_shutdown;
use wunderbridge::topic::Topics;
use wunderbridge::WundergroundClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Args = argh::from_env();
    let config = match Config::load(&args) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };
    log::info!(
        "Bridging {} station(s) to {}",
        config.stations.len(),
        config.server
    );

    let (_shutdown_tx, mut shutdown_rx) = setup_shutdown()?;

    let (mqtt, eventloop) = match MqttBus::connect(&config.bus_options()?).await {
        Ok(connected) => connected,
        Err(e) => {
            log::error!("Failed to connect to MQTT broker: {}", e);
            return Err(e.into());
        }
    };
    tokio::spawn(bus::run_event_loop(eventloop, shutdown_rx.clone()));

    let registry = Arc::new(WeatherMetrics::new()?);
    let mut metrics_server = tokio::spawn(metrics::run_metrics_server(
        registry.clone(),
        config.metrics_port,
        shutdown_rx.clone(),
    ));

    let client = WundergroundClient::with_options(
        config.api_key.clone(),
        config.api_base_url.clone(),
        config.http_timeout,
    )?;
    let bridge = Arc::new(Bridge::new(
        client,
        mqtt,
        registry,
        Topics::new(config.topic_namespace.clone()),
        config.poll_interval,
    ));
    let _stations = bridge.spawn_stations(&config.stations, &shutdown_rx);

    tokio::select! {
        _ = shutdown_rx.changed() => {
            log::info!("Shutting down");
        }
        result = &mut metrics_server => {
            match result {
                Ok(Ok(())) => log::warn!("Metrics endpoint exited"),
                Ok(Err(e)) => {
                    log::error!("Metrics endpoint failed: {}", e);
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}
