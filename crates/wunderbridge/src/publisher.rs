//! Fan-out of normalized fields to the bus and the metrics registry.

use crate::bus::BusPublisher;
use crate::metrics::MetricsSink;
use crate::observation::{FieldName, FieldValue, NormalizedField};
use crate::topic::Topics;

/// What one fan-out did. Informational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub published: usize,
    pub failed: usize,
    pub metrics_written: usize,
}

/// Publish every field retained on its topic and mirror mapped fields into
/// gauges.
///
/// A bus failure is logged and does not stop the gauge write or later
/// fields.
pub async fn publish<B, M>(
    station_id: &str,
    fields: &[NormalizedField],
    topics: &Topics,
    bus: &B,
    metrics: &M,
) -> PublishSummary
where
    B: BusPublisher,
    M: MetricsSink + ?Sized,
{
    let mut summary = PublishSummary::default();

    for field in fields {
        let topic = topics.topic(station_id, field.name.property());

        match bus.publish(&topic, field.value.payload()).await {
            Ok(()) => summary.published += 1,
            Err(e) => {
                log::warn!("{}: failed to publish {}: {}", station_id, topic, e);
                summary.failed += 1;
            }
        }

        if let FieldName::Temperature = field.name {
            if let FieldValue::Number(t) = field.value {
                log::info!("{}: {:.1} C", station_id, t);
            }
        }

        if let (Some(gauge), Some(value)) = (field.name.gauge(), field.value.as_f64()) {
            metrics.set_gauge(gauge, station_id, value);
            summary.metrics_written += 1;
        }
    }

    summary
}
