//! MQTT bus client.
//!
//! Wraps a rumqttc `AsyncClient`. The event loop is driven by its own task
//! ([`run_event_loop`]); rumqttc reconnects on the next poll after an error.
//! Publishing never waits on the broker: when the request queue is full the
//! message is dropped with an error.

use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS, Transport,
};
use std::time::Duration;
use tokio::sync::watch;

/// Default broker URL.
pub const DEFAULT_SERVER: &str = "tcp://127.0.0.1:1883";

const DEFAULT_PORT: u16 = 1883;
const DEFAULT_TLS_PORT: u16 = 8883;

/// How long to wait for the broker's CONNACK at startup.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between polls after a connection error.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Request channel capacity between the client handle and the event loop.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Invalid broker address: {0}")]
    InvalidAddress(String),
    #[error("Invalid QoS level: {0}")]
    InvalidQos(u8),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Publish failed: {0}")]
    Publish(#[from] rumqttc::ClientError),
}

/// Parse a numeric QoS level.
pub fn qos_from_level(level: u8) -> Result<QoS, BusError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(BusError::InvalidQos(other)),
    }
}

/// Broker host, port and transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerAddress {
    /// Parse `tcp://`, `mqtt://`, `ssl://`, `tls://` or `mqtts://` URLs, or a
    /// bare `host[:port]`.
    pub fn parse(server: &str) -> Result<Self, BusError> {
        let trimmed = server.trim();
        let (rest, tls) = match trimmed.split_once("://") {
            Some(("tcp" | "mqtt", rest)) => (rest, false),
            Some(("ssl" | "tls" | "mqtts", rest)) => (rest, true),
            Some((scheme, _)) => {
                return Err(BusError::InvalidAddress(format!(
                    "{}: unsupported scheme '{}'",
                    server, scheme
                )))
            }
            None => (trimmed, false),
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    BusError::InvalidAddress(format!("{}: invalid port '{}'", server, port))
                })?;
                (host, port)
            }
            None if tls => (rest, DEFAULT_TLS_PORT),
            None => (rest, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(BusError::InvalidAddress(format!("{}: missing host", server)));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }
}

/// Connection settings for the broker.
#[derive(Debug, Clone)]
pub struct BusOptions {
    pub address: BrokerAddress,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub qos: QoS,
}

impl BusOptions {
    fn mqtt_options(&self) -> MqttOptions {
        let mut options =
            MqttOptions::new(&self.client_id, &self.address.host, self.address.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if self.address.tls {
            // Server certificate checked against the system roots.
            options.set_transport(Transport::tls_with_default_config());
        }
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }
        options
    }
}

/// Destination for retained station messages.
pub trait BusPublisher: Send + Sync + 'static {
    /// Publish a retained message. Must not wait on the network.
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<(), BusError>> + Send;
}

/// MQTT client handle. Cheap to clone.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
    qos: QoS,
}

impl MqttBus {
    /// Connect and wait for the broker to accept the session.
    ///
    /// Returns the client handle and the event loop, which the caller must
    /// keep polling (see [`run_event_loop`]).
    pub async fn connect(options: &BusOptions) -> Result<(Self, EventLoop), BusError> {
        log::info!(
            "Connecting to MQTT broker at {}:{} as {}",
            options.address.host,
            options.address.port,
            options.client_id
        );

        let (client, mut eventloop) = AsyncClient::new(options.mqtt_options(), CHANNEL_CAPACITY);
        let bus = Self::new(client, options.qos);

        tokio::time::timeout(CONNECT_TIMEOUT, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| {
                BusError::Connect(format!(
                    "no CONNACK within {}s",
                    CONNECT_TIMEOUT.as_secs()
                ))
            })??;

        log::info!(
            "Connected to {}:{}",
            options.address.host,
            options.address.port
        );

        Ok((bus, eventloop))
    }

    fn new(client: AsyncClient, qos: QoS) -> Self {
        Self { client, qos }
    }
}

impl BusPublisher for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.client.try_publish(topic, self.qos, true, payload)?;
        Ok(())
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), BusError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(BusError::Connect(format!("broker refused: {:?}", code))),
                };
            }
            Ok(_) => continue,
            Err(e) => return Err(BusError::Connect(e.to_string())),
        }
    }
}

/// Drive the MQTT event loop until shutdown.
///
/// Connection errors are logged and polling resumes after a short pause,
/// which makes rumqttc reconnect.
pub async fn run_event_loop(mut eventloop: EventLoop, mut shutdown: watch::Receiver<()>) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                log::debug!("MQTT event loop stopping");
                break;
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    log::info!("MQTT session (re)established");
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!("MQTT connection error: {}", e);
                    tokio::time::sleep(RECONNECT_INTERVAL).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_url() {
        let addr = BrokerAddress::parse("tcp://127.0.0.1:1883").unwrap();
        assert_eq!(addr.host, "127.0.0.1");
        assert_eq!(addr.port, 1883);
    }

    #[test]
    fn test_parse_mqtt_scheme_and_default_port() {
        let addr = BrokerAddress::parse("mqtt://broker.local").unwrap();
        assert_eq!(addr.host, "broker.local");
        assert_eq!(addr.port, 1883);
    }

    #[test]
    fn test_parse_bare_host_port() {
        let addr = BrokerAddress::parse("broker.local:8883").unwrap();
        assert_eq!(addr.host, "broker.local");
        assert_eq!(addr.port, 8883);
    }

    #[test]
    fn test_parse_tls_schemes() {
        for server in ["ssl://broker.local", "tls://broker.local", "mqtts://broker.local"] {
            let addr = BrokerAddress::parse(server).unwrap();
            assert_eq!(addr.host, "broker.local");
            assert_eq!(addr.port, 8883);
            assert!(addr.tls);
        }
        let addr = BrokerAddress::parse("ssl://broker.local:9883").unwrap();
        assert_eq!(addr.port, 9883);
        assert!(!BrokerAddress::parse("tcp://broker.local").unwrap().tls);
    }

    #[test]
    fn test_tls_address_selects_tls_transport() {
        let options = BusOptions {
            address: BrokerAddress::parse("ssl://broker.local").unwrap(),
            client_id: "wunderbridge-test".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            qos: QoS::AtMostOnce,
        };
        assert!(matches!(options.mqtt_options().transport(), Transport::Tls(_)));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(BrokerAddress::parse("ws://broker:80").is_err());
        assert!(BrokerAddress::parse("tcp://broker:notaport").is_err());
        assert!(BrokerAddress::parse("tcp://:1883").is_err());
        assert!(BrokerAddress::parse("").is_err());
    }

    #[test]
    fn test_qos_levels() {
        assert_eq!(qos_from_level(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2).unwrap(), QoS::ExactlyOnce);
        assert!(matches!(qos_from_level(3), Err(BusError::InvalidQos(3))));
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        use crate::metrics::{Gauge, WeatherMetrics};
        use crate::observation::{self, ObservationLocation, RawObservation};
        use crate::publisher;
        use crate::topic::Topics;

        // The event loop is never polled, as while the broker is down.
        let (client, _eventloop) = AsyncClient::new(
            MqttOptions::new("wunderbridge-test", "127.0.0.1", 1),
            CHANNEL_CAPACITY,
        );
        let bus = MqttBus::new(client, QoS::AtMostOnce);
        let metrics = WeatherMetrics::new().unwrap();
        let topics = Topics::default();

        let mut published = 0;
        let mut failed = 0;
        for n in 0..10 {
            let station = format!("S{}", n);
            let raw = RawObservation {
                observation_location: ObservationLocation {
                    latitude: "48.4".to_string(),
                    longitude: "-123.3".to_string(),
                },
                station_id: station.clone(),
                temp_c: 11.8,
                relative_humidity: "55%".to_string(),
                wind_degrees: 270,
                wind_kph: 14.5,
                feelslike_c: "10.9".to_string(),
                precip_today_metric: "2.3".to_string(),
            };
            let fields = observation::normalize(&station, &raw).unwrap();
            let summary = tokio::time::timeout(
                Duration::from_secs(2),
                publisher::publish(&station, &fields, &topics, &bus, &metrics),
            )
            .await
            .unwrap_or_else(|_| panic!("{} fan-out blocked on the bus", station));

            assert_eq!(summary.metrics_written, 5);
            assert_eq!(metrics.value(Gauge::Temperature, &station), Some(11.8));
            published += summary.published;
            failed += summary.failed;
        }

        assert_eq!(published + failed, 80);
        assert!(published <= CHANNEL_CAPACITY);
        assert!(failed > 0);
    }

    #[tokio::test]
    async fn test_connect_fails_without_broker() {
        // Port 1 on localhost is not an MQTT broker.
        let options = BusOptions {
            address: BrokerAddress {
                host: "127.0.0.1".to_string(),
                port: 1,
                tls: false,
            },
            client_id: "wunderbridge-test".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            qos: QoS::AtMostOnce,
        };
        let result = MqttBus::connect(&options).await;
        assert!(matches!(result, Err(BusError::Connect(_))));
    }
}
