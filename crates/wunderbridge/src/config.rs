//! Process configuration.
//!
//! Values are layered: built-in defaults, then the optional YAML file, then
//! command-line flags. Secrets can also come from the environment.

use argh::FromArgs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bus::{self, BrokerAddress, BusOptions};
use crate::fetcher;
use crate::scheduler;
use crate::topic;

/// Environment fallback for the provider API key.
pub const API_KEY_ENV: &str = "WUNDERGROUND_API_KEY";

/// Environment fallback for the broker password.
pub const MQTT_PASSWORD_ENV: &str = "WUNDERBRIDGE_MQTT_PASSWORD";

const DEFAULT_METRICS_PORT: u16 = 8080;
const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Republish Weather Underground station observations to MQTT and Prometheus.
#[derive(FromArgs, Debug, Default)]
pub struct Args {
    /// path to a YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    /// the full url of the MQTT server, e.g. tcp://127.0.0.1:1883
    #[argh(option)]
    pub server: Option<String>,

    /// a client id for the MQTT connection
    #[argh(option)]
    pub client_id: Option<String>,

    /// username to authenticate to the MQTT server
    #[argh(option)]
    pub username: Option<String>,

    /// password to match username
    #[argh(option)]
    pub password: Option<String>,

    /// weather underground API key
    #[argh(option)]
    pub api_key: Option<String>,

    /// comma separated list of stations
    #[argh(option)]
    pub stations: Option<String>,

    /// port for the /metrics endpoint
    #[argh(option)]
    pub metrics_port: Option<u16>,

    /// polling interval in seconds
    #[argh(option)]
    pub interval: Option<u64>,

    /// MQTT QoS level (0, 1 or 2)
    #[argh(option)]
    pub qos: Option<u8>,
}

/// YAML file layout. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub server: Option<String>,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    #[serde(default)]
    pub stations: Vec<String>,
    pub metrics_port: Option<u16>,
    pub poll_interval_secs: Option<u64>,
    pub topic_namespace: Option<String>,
    pub api_base_url: Option<String>,
    pub qos: Option<u8>,
    pub http_timeout_secs: Option<u64>,
    pub keep_alive_secs: Option<u64>,
}

impl FileConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Resolved, validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: String,
    pub stations: Vec<String>,
    pub metrics_port: u16,
    pub poll_interval: Duration,
    pub topic_namespace: String,
    pub api_base_url: String,
    pub qos: u8,
    pub http_timeout: Duration,
    pub keep_alive: Duration,
}

impl Config {
    /// Resolve from parsed flags, reading the config file they name.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => FileConfig::from_file(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(file, args, |key| std::env::var(key).ok())
    }

    /// Merge file values and flags over defaults, then validate.
    pub fn resolve(
        file: FileConfig,
        args: &Args,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let stations = match &args.stations {
            Some(list) => parse_stations(list),
            None => file
                .stations
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        };

        let config = Self {
            server: args
                .server
                .clone()
                .or(file.server)
                .unwrap_or_else(|| bus::DEFAULT_SERVER.to_string()),
            client_id: args
                .client_id
                .clone()
                .or(file.client_id)
                .unwrap_or_else(default_client_id),
            username: args.username.clone().or(file.username),
            password: args
                .password
                .clone()
                .or(file.password)
                .or_else(|| env(MQTT_PASSWORD_ENV)),
            api_key: args
                .api_key
                .clone()
                .or(file.api_key)
                .or_else(|| env(API_KEY_ENV))
                .unwrap_or_default(),
            stations,
            metrics_port: args
                .metrics_port
                .or(file.metrics_port)
                .unwrap_or(DEFAULT_METRICS_PORT),
            poll_interval: args
                .interval
                .or(file.poll_interval_secs)
                .map(Duration::from_secs)
                .unwrap_or(scheduler::DEFAULT_INTERVAL),
            topic_namespace: file
                .topic_namespace
                .unwrap_or_else(|| topic::DEFAULT_NAMESPACE.to_string()),
            api_base_url: file
                .api_base_url
                .unwrap_or_else(|| fetcher::DEFAULT_BASE_URL.to_string()),
            qos: args.qos.or(file.qos).unwrap_or(0),
            http_timeout: file
                .http_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(fetcher::DEFAULT_TIMEOUT),
            keep_alive: Duration::from_secs(
                file.keep_alive_secs.unwrap_or(DEFAULT_KEEP_ALIVE_SECS),
            ),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(invalid(format!(
                "api_key is required (flag --api-key or {})",
                API_KEY_ENV
            )));
        }
        if self.stations.is_empty() {
            return Err(invalid("stations: at least one station is required"));
        }
        if let Some(bad) = self
            .stations
            .iter()
            .find(|s| s.contains(['/', '+', '#']))
        {
            return Err(invalid(format!(
                "stations: '{}' contains a topic separator or wildcard",
                bad
            )));
        }
        if self.topic_namespace.is_empty() {
            return Err(invalid("topic_namespace must not be empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(invalid("poll_interval_secs must be greater than zero"));
        }
        if self.http_timeout.is_zero() {
            return Err(invalid("http_timeout_secs must be greater than zero"));
        }
        if self.keep_alive.is_zero() {
            return Err(invalid("keep_alive_secs must be greater than zero"));
        }
        if self.client_id.is_empty() {
            return Err(invalid("client_id must not be empty"));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(invalid("password given without username"));
        }
        bus::qos_from_level(self.qos).map_err(|e| invalid(format!("qos: {}", e)))?;
        BrokerAddress::parse(&self.server).map_err(|e| invalid(format!("server: {}", e)))?;
        Ok(())
    }

    /// MQTT connection settings.
    pub fn bus_options(&self) -> Result<BusOptions, ConfigError> {
        Ok(BusOptions {
            address: BrokerAddress::parse(&self.server)
                .map_err(|e| invalid(format!("server: {}", e)))?,
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            keep_alive: self.keep_alive,
            qos: bus::qos_from_level(self.qos).map_err(|e| invalid(format!("qos: {}", e)))?,
        })
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

/// Split a comma separated station list, dropping blanks.
pub fn parse_stations(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Hostname followed by the current second, e.g. `weatherbox42`.
fn default_client_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "wunderbridge".to_string());
    let second = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        % 60;
    format!("{}{}", host, second)
}
