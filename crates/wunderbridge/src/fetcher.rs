//! Weather Underground `conditions` client.
//!
//! One GET per call, no retry. The next scheduler tick is the retry.

use std::time::Duration;

use crate::observation::{ConditionsResponse, RawObservation};

/// Default provider base URL.
pub const DEFAULT_BASE_URL: &str = "http://api.wunderground.com";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Transport failure (connect, timeout, read).
    #[error("HTTP error: {0}")]
    Network(#[source] reqwest::Error),

    /// Provider answered with a non-success status.
    #[error("API error (status {0})")]
    Status(u16),

    /// Body did not match the conditions response shape.
    #[error("decode error: {0}")]
    Decode(String),
}

impl FetchError {
    /// Transport and status failures are both network failures.
    pub fn is_network(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::Status(_))
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// Source of raw observations for a station.
///
/// The scheduler depends on this trait instead of the HTTP client so it can
/// be driven by an in-memory source in tests.
pub trait ObservationSource: Send + Sync + 'static {
    fn fetch(
        &self,
        station_id: &str,
    ) -> impl std::future::Future<Output = Result<RawObservation>> + Send;
}

/// Build the conditions URL for a station.
pub fn conditions_url(base_url: &str, api_key: &str, station_id: &str) -> String {
    format!(
        "{}/api/{}/conditions/q/pws:{}.json",
        base_url.trim_end_matches('/'),
        api_key,
        station_id
    )
}

/// HTTP client for the provider API.
#[derive(Debug, Clone)]
pub struct WundergroundClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl WundergroundClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_options(api_key, DEFAULT_BASE_URL, DEFAULT_TIMEOUT)
    }

    pub fn with_options(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Network)?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    /// Fetch the current observation for `station_id`.
    ///
    /// The returned record is not validated; a response for a different
    /// station is still `Ok`.
    pub async fn fetch_observation(&self, station_id: &str) -> Result<RawObservation> {
        let url = conditions_url(&self.base_url, &self.api_key, station_id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(FetchError::Network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(FetchError::Network)?;
        decode(&body)
    }
}

impl ObservationSource for WundergroundClient {
    async fn fetch(&self, station_id: &str) -> Result<RawObservation> {
        self.fetch_observation(station_id).await
    }
}

/// Decode a conditions response body.
pub fn decode(body: &[u8]) -> Result<RawObservation> {
    serde_json::from_slice::<ConditionsResponse>(body)
        .map(|response| response.current_observation)
        .map_err(|e| FetchError::Decode(e.to_string()))
}
