//! Weather Underground to MQTT and Prometheus bridge.
//!
//! Polls the `conditions` endpoint for each configured personal weather
//! station, normalizes the record, publishes every field retained under
//! `{namespace}/stations/{station}/{property}` and mirrors five of them into
//! Prometheus gauges served on `/metrics`.
//!
//! The pipeline per station is
//! [`ObservationSource`] -> [`observation::normalize`] -> [`publisher::publish`],
//! driven by [`Bridge::run_station`].

pub mod bus;
pub mod config;
pub mod fetcher;
pub mod metrics;
pub mod observation;
pub mod publisher;
pub mod scheduler;
pub mod shutdown;
pub mod topic;

pub use bus::{BusError, BusOptions, BusPublisher, MqttBus};
pub use config::{Args, Config, ConfigError};
pub use fetcher::{FetchError, ObservationSource, WundergroundClient};
pub use metrics::{Gauge, MetricsError, MetricsSink, WeatherMetrics};
pub use observation::{FieldName, FieldValue, NormalizedField, RawObservation, ValidationError};
pub use publisher::PublishSummary;
pub use scheduler::{Bridge, CycleOutcome};
pub use topic::Topics;
