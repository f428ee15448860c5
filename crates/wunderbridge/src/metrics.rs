//! Prometheus gauges and the `/metrics` scrape endpoint.
//!
//! Gauges are labelled by `sensor_name` (the station id) and `area`, which is
//! always [`AREA`]. The registry is owned by [`WeatherMetrics`] rather than
//! the process-global default, so each instance is independent.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tokio::sync::watch;

/// Constant `area` label value.
pub const AREA: &str = "wunderground";

const LABELS: [&str; 2] = ["sensor_name", "area"];

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("Metrics contain invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("Metrics server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Gauge families mirrored from observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gauge {
    Temperature,
    Humidity,
    Precipitation,
    WindDirection,
    WindSpeed,
}

impl Gauge {
    pub const ALL: [Gauge; 5] = [
        Gauge::Temperature,
        Gauge::Humidity,
        Gauge::Precipitation,
        Gauge::WindDirection,
        Gauge::WindSpeed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Gauge::Temperature => "thermometer_temperature_celsius",
            Gauge::Humidity => "hygrometer_humidity_percent",
            Gauge::Precipitation => "precipitation_mm",
            Gauge::WindDirection => "wind_direction_degrees",
            Gauge::WindSpeed => "wind_speed_kph",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            Gauge::Temperature => "Current temperature of the thermometer.",
            Gauge::Humidity => "Current humidity of the hygrometer.",
            Gauge::Precipitation => "Today's precipitation in mm.",
            Gauge::WindDirection => "Current wind direction in degrees",
            Gauge::WindSpeed => "Current wind speed in kph",
        }
    }
}

/// Destination for gauge updates.
///
/// Implementations own their synchronization; callers share them across
/// station tasks behind an `Arc`.
pub trait MetricsSink: Send + Sync + 'static {
    /// Overwrite the gauge for `(station_id, AREA)`.
    fn set_gauge(&self, gauge: Gauge, station_id: &str, value: f64);
}

fn register(registry: &Registry, gauge: Gauge) -> Result<GaugeVec, MetricsError> {
    let vec = GaugeVec::new(Opts::new(gauge.name(), gauge.help()), &LABELS)?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

/// Prometheus-backed gauge registry.
pub struct WeatherMetrics {
    registry: Registry,
    temperature: GaugeVec,
    humidity: GaugeVec,
    precipitation: GaugeVec,
    wind_direction: GaugeVec,
    wind_speed: GaugeVec,
}

impl WeatherMetrics {
    /// Create the gauge families and register them in a fresh registry.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let temperature = register(&registry, Gauge::Temperature)?;
        let humidity = register(&registry, Gauge::Humidity)?;
        let precipitation = register(&registry, Gauge::Precipitation)?;
        let wind_direction = register(&registry, Gauge::WindDirection)?;
        let wind_speed = register(&registry, Gauge::WindSpeed)?;

        Ok(Self {
            registry,
            temperature,
            humidity,
            precipitation,
            wind_direction,
            wind_speed,
        })
    }

    fn family(&self, gauge: Gauge) -> &GaugeVec {
        match gauge {
            Gauge::Temperature => &self.temperature,
            Gauge::Humidity => &self.humidity,
            Gauge::Precipitation => &self.precipitation,
            Gauge::WindDirection => &self.wind_direction,
            Gauge::WindSpeed => &self.wind_speed,
        }
    }

    /// Current value of a gauge, or `None` if the station never set it.
    pub fn value(&self, gauge: Gauge, station_id: &str) -> Option<f64> {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == gauge.name())
            .flat_map(|family| family.get_metric().iter())
            .find(|metric| {
                metric.get_label().iter().any(|label| {
                    label.get_name() == "sensor_name" && label.get_value() == station_id
                })
            })
            .map(|metric| metric.get_gauge().get_value())
    }

    /// Render every registered family in the Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}

impl MetricsSink for WeatherMetrics {
    fn set_gauge(&self, gauge: Gauge, station_id: &str, value: f64) {
        self.family(gauge)
            .with_label_values(&[station_id, AREA])
            .set(value);
    }
}

// ── HTTP endpoint ───────────────────────────────────────────────────

async fn scrape(State(metrics): State<Arc<WeatherMetrics>>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, metrics.content_type())],
            body,
        ),
        Err(e) => {
            log::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                e.to_string(),
            )
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

/// Router serving `GET /metrics` and `GET /health`.
pub fn metrics_router(metrics: Arc<WeatherMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .route("/health", get(health))
        .with_state(metrics)
}

/// Serve the scrape endpoint on `0.0.0.0:<port>` until shutdown.
pub async fn run_metrics_server(
    metrics: Arc<WeatherMetrics>,
    port: u16,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), MetricsError> {
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    log::info!("Metrics endpoint listening on http://{}/metrics", bind_addr);

    axum::serve(listener, metrics_router(metrics))
        .with_graceful_shutdown(async move {
            shutdown_rx.changed().await.ok();
        })
        .await?;

    log::info!("Metrics endpoint stopped.");
    Ok(())
}
