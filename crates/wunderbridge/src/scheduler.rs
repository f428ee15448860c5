//! Per-station polling loop.
//!
//! Each configured station gets its own task that repeats
//! fetch -> normalize -> fan-out on a fixed period. Stations share nothing
//! but the bus and metrics sinks, so a failing or slow station never delays
//! another.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::bus::BusPublisher;
use crate::fetcher::{FetchError, ObservationSource};
use crate::metrics::MetricsSink;
use crate::observation::{self, ValidationError};
use crate::publisher::{self, PublishSummary};
use crate::topic::Topics;

/// Default polling period (20 minutes).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(20 * 60);

/// Result of one station cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Record matched; fields were fanned out.
    Published(PublishSummary),
    /// Nothing was published; prior values stand.
    FetchFailed(FetchError),
    /// Record belonged to another station and was discarded.
    Mismatch(ValidationError),
}

/// Shared state for all station tasks.
pub struct Bridge<S, B, M> {
    source: S,
    bus: B,
    metrics: Arc<M>,
    topics: Topics,
    interval: Duration,
}

impl<S, B, M> Bridge<S, B, M>
where
    S: ObservationSource,
    B: BusPublisher,
    M: MetricsSink,
{
    pub fn new(source: S, bus: B, metrics: Arc<M>, topics: Topics, interval: Duration) -> Self {
        Self {
            source,
            bus,
            metrics,
            topics,
            interval,
        }
    }

    /// Run a single fetch -> normalize -> fan-out cycle for `station_id`.
    pub async fn run_cycle(&self, station_id: &str) -> CycleOutcome {
        log::info!("{}: Fetching latest observation", station_id);

        let raw = match self.source.fetch(station_id).await {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("{}: Failed to fetch observation: {}", station_id, e);
                return CycleOutcome::FetchFailed(e);
            }
        };

        let fields = match observation::normalize(station_id, &raw) {
            Ok(fields) => fields,
            Err(e) => {
                log::warn!("{}: Discarding observation: {}", station_id, e);
                return CycleOutcome::Mismatch(e);
            }
        };

        let summary = publisher::publish(
            station_id,
            &fields,
            &self.topics,
            &self.bus,
            self.metrics.as_ref(),
        )
        .await;

        log::info!(
            "{}: published {} fields ({} failed), {} gauges updated",
            station_id,
            summary.published,
            summary.failed,
            summary.metrics_written
        );

        CycleOutcome::Published(summary)
    }

    /// Poll `station_id` until shutdown. The first cycle starts immediately.
    pub async fn run_station(self: Arc<Self>, station_id: String, mut shutdown: watch::Receiver<()>) {
        let mut next = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    log::debug!("{}: station task stopping", station_id);
                    break;
                }
                _ = tokio::time::sleep_until(next) => {}
            }

            self.run_cycle(&station_id).await;

            next = next_tick(next, self.interval, Instant::now());
            log::info!("{}: Sleeping", station_id);
        }
    }

    /// Spawn one task per distinct station.
    pub fn spawn_stations(
        self: &Arc<Self>,
        stations: &[String],
        shutdown: &watch::Receiver<()>,
    ) -> JoinSet<()> {
        let mut seen = HashSet::new();
        let mut tasks = JoinSet::new();

        for station in stations {
            if !seen.insert(station.as_str()) {
                log::warn!("{}: listed more than once, polling it once", station);
                continue;
            }
            log::info!(
                "{}: polling every {}s",
                station,
                self.interval.as_secs()
            );
            tasks.spawn(self.clone().run_station(station.clone(), shutdown.clone()));
        }

        tasks
    }
}

/// First tick boundary after `now`, counting in whole periods from `last`.
///
/// Boundaries that passed while a cycle was running are dropped rather than
/// fired back to back.
pub fn next_tick(last: Instant, period: Duration, now: Instant) -> Instant {
    let mut next = last + period;
    while next <= now {
        next += period;
    }
    next
}
