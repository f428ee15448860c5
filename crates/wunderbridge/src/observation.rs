//! Provider response shape and per-field normalization.
//!
//! A [`RawObservation`] is decoded as-is from the provider. [`normalize`]
//! checks that the record belongs to the requested station and then applies
//! each field's rule independently, so one bad field never hides another.

use serde::{Deserialize, Deserializer};

use crate::metrics::Gauge;

/// Provider value meaning "wind direction not available".
pub const WIND_DEGREES_UNSET: i32 = -9999;

// ── Raw provider shape ──────────────────────────────────────────────

/// Top-level body of a `conditions` response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConditionsResponse {
    pub current_observation: RawObservation,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ObservationLocation {
    #[serde(default, deserialize_with = "text_or_empty")]
    pub latitude: String,
    #[serde(default, deserialize_with = "text_or_empty")]
    pub longitude: String,
}

/// The `current_observation` object of a conditions response.
///
/// `station_id`, `temp_c` and `wind_kph` are required. Text fields that are
/// missing or `null` decode as empty and are left to [`normalize`]; a missing
/// `wind_degrees` decodes as [`WIND_DEGREES_UNSET`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawObservation {
    #[serde(default)]
    pub observation_location: ObservationLocation,
    pub station_id: String,
    pub temp_c: f64,
    #[serde(default, deserialize_with = "text_or_empty")]
    pub relative_humidity: String,
    #[serde(default = "wind_degrees_unset", deserialize_with = "degrees_or_unset")]
    pub wind_degrees: i32,
    pub wind_kph: f64,
    #[serde(default, deserialize_with = "text_or_empty")]
    pub feelslike_c: String,
    #[serde(default, deserialize_with = "text_or_empty")]
    pub precip_today_metric: String,
}

fn text_or_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn degrees_or_unset<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
    Ok(Option::<i32>::deserialize(deserializer)?.unwrap_or(WIND_DEGREES_UNSET))
}

fn wind_degrees_unset() -> i32 {
    WIND_DEGREES_UNSET
}

// ── Normalized fields ───────────────────────────────────────────────

/// Fields republished from an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldName {
    Latitude,
    Longitude,
    Temperature,
    RelativeHumidity,
    WindDegrees,
    WindSpeed,
    FeelsLike,
    Precipitation,
}

impl FieldName {
    pub const ALL: [FieldName; 8] = [
        FieldName::Latitude,
        FieldName::Longitude,
        FieldName::Temperature,
        FieldName::RelativeHumidity,
        FieldName::WindDegrees,
        FieldName::WindSpeed,
        FieldName::FeelsLike,
        FieldName::Precipitation,
    ];

    /// Topic property segment for this field.
    pub fn property(self) -> &'static str {
        match self {
            FieldName::Latitude => "latitude",
            FieldName::Longitude => "longitude",
            FieldName::Temperature => "temperature_degrees",
            FieldName::RelativeHumidity => "relative_humidity_percent",
            FieldName::WindDegrees => "wind_degrees",
            FieldName::WindSpeed => "wind_kph",
            FieldName::FeelsLike => "temperature_feels_like_degrees",
            FieldName::Precipitation => "precip_today_mm",
        }
    }

    /// Gauge mirrored by this field, if any.
    pub fn gauge(self) -> Option<Gauge> {
        match self {
            FieldName::Temperature => Some(Gauge::Temperature),
            FieldName::RelativeHumidity => Some(Gauge::Humidity),
            FieldName::WindDegrees => Some(Gauge::WindDirection),
            FieldName::WindSpeed => Some(Gauge::WindSpeed),
            FieldName::Precipitation => Some(Gauge::Precipitation),
            FieldName::Latitude | FieldName::Longitude | FieldName::FeelsLike => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Integer(i32),
    Text(String),
}

impl FieldValue {
    /// Numeric view used for gauges. Text has none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(v) => Some(*v),
            FieldValue::Integer(v) => Some(f64::from(*v)),
            FieldValue::Text(_) => None,
        }
    }

    /// Bus payload: numbers as JSON numbers, text verbatim.
    pub fn payload(&self) -> Vec<u8> {
        match self {
            FieldValue::Number(v) => serde_json::Value::from(*v).to_string().into_bytes(),
            FieldValue::Integer(v) => v.to_string().into_bytes(),
            FieldValue::Text(s) => s.as_bytes().to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedField {
    pub name: FieldName,
    pub value: FieldValue,
}

impl NormalizedField {
    fn new(name: FieldName, value: FieldValue) -> Self {
        Self { name, value }
    }
}

// ── Validation ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("station mismatch: requested {expected}, got {actual}")]
    StationMismatch { expected: String, actual: String },
}

/// Extract the valid fields of `raw` for `station_id`.
pub fn normalize(
    station_id: &str,
    raw: &RawObservation,
) -> Result<Vec<NormalizedField>, ValidationError> {
    if raw.station_id != station_id {
        return Err(ValidationError::StationMismatch {
            expected: station_id.to_string(),
            actual: raw.station_id.clone(),
        });
    }

    let mut fields = Vec::with_capacity(FieldName::ALL.len());

    fields.push(NormalizedField::new(
        FieldName::Latitude,
        FieldValue::Text(raw.observation_location.latitude.clone()),
    ));
    fields.push(NormalizedField::new(
        FieldName::Longitude,
        FieldValue::Text(raw.observation_location.longitude.clone()),
    ));
    fields.push(NormalizedField::new(
        FieldName::Temperature,
        FieldValue::Number(raw.temp_c),
    ));

    match parse_percent(&raw.relative_humidity) {
        Some(value) => fields.push(NormalizedField::new(
            FieldName::RelativeHumidity,
            FieldValue::Number(value),
        )),
        None => log::debug!(
            "{}: relative humidity {:?} unavailable",
            station_id,
            raw.relative_humidity
        ),
    }

    if raw.wind_degrees != WIND_DEGREES_UNSET {
        fields.push(NormalizedField::new(
            FieldName::WindDegrees,
            FieldValue::Integer(raw.wind_degrees),
        ));
    } else {
        log::debug!("{}: wind direction unavailable", station_id);
    }

    fields.push(NormalizedField::new(
        FieldName::WindSpeed,
        FieldValue::Number(raw.wind_kph),
    ));
    fields.push(NormalizedField::new(
        FieldName::FeelsLike,
        FieldValue::Text(raw.feelslike_c.clone()),
    ));

    match parse_number(&raw.precip_today_metric) {
        Some(value) => fields.push(NormalizedField::new(
            FieldName::Precipitation,
            FieldValue::Number(value),
        )),
        None => log::debug!(
            "{}: precipitation {:?} unavailable",
            station_id,
            raw.precip_today_metric
        ),
    }

    Ok(fields)
}

/// Parse `"55%"` into 55.0. Text without the suffix is rejected.
fn parse_percent(text: &str) -> Option<f64> {
    text.strip_suffix('%').and_then(parse_number)
}

/// Finite float parse; NaN and infinities count as failures. Surrounding
/// whitespace is not accepted.
fn parse_number(text: &str) -> Option<f64> {
    text.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}
