//! Test helpers: recording bus and a fake conditions API

#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use wunderbridge::bus::{BusError, BusPublisher};

pub const API_KEY: &str = "test-key";

/// Bus that records every retained message. Clones share the log.
#[derive(Clone, Default)]
pub struct RecordingBus {
    messages: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl RecordingBus {
    pub fn messages(&self) -> Vec<(String, Vec<u8>)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.messages().into_iter().map(|(t, _)| t).collect()
    }

    /// Payload of the last message on `topic`, as text.
    pub fn payload(&self, topic: &str) -> Option<String> {
        self.messages()
            .into_iter()
            .rev()
            .find(|(t, _)| t == topic)
            .map(|(_, p)| String::from_utf8_lossy(&p).to_string())
    }

    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }
}

impl BusPublisher for RecordingBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.messages
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }
}

/// Canned conditions body for `station_id`.
pub fn conditions_body(
    station_id: &str,
    relative_humidity: &str,
    wind_degrees: i32,
    precip_today_metric: &str,
) -> String {
    serde_json::json!({
        "response": { "version": "0.1" },
        "current_observation": {
            "observation_location": {
                "full": "Victoria, British Columbia",
                "latitude": "48.428",
                "longitude": "-123.365"
            },
            "station_id": station_id,
            "temp_c": 11.8,
            "relative_humidity": relative_humidity,
            "wind_degrees": wind_degrees,
            "wind_kph": 14.5,
            "feelslike_c": "10.9",
            "precip_today_metric": precip_today_metric
        }
    })
    .to_string()
}

#[derive(Default)]
struct ProviderState {
    replies: HashMap<String, (u16, String)>,
    requests: Vec<(String, String)>,
}

/// In-process stand-in for the provider's conditions endpoint.
pub struct FakeProvider {
    pub addr: SocketAddr,
    state: Arc<Mutex<ProviderState>>,
    shutdown_tx: watch::Sender<()>,
}

impl FakeProvider {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(ProviderState::default()));
        let router = Router::new()
            .route("/api/{key}/conditions/q/{query}", get(conditions))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(());

        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.changed().await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown_tx,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Answer requests for `station_id` with `status` and `body`.
    pub fn reply(&self, station_id: &str, status: u16, body: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .replies
            .insert(station_id.to_string(), (status, body.into()));
    }

    /// `(api_key, station_id)` of every request served so far.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().requests.clone()
    }
}

impl Drop for FakeProvider {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

async fn conditions(
    State(state): State<Arc<Mutex<ProviderState>>>,
    Path((key, query)): Path<(String, String)>,
) -> (StatusCode, String) {
    let station = query
        .strip_prefix("pws:")
        .and_then(|q| q.strip_suffix(".json"))
        .unwrap_or(&query)
        .to_string();

    let mut state = state.lock().unwrap();
    state.requests.push((key, station.clone()));
    match state.replies.get(&station) {
        Some((status, body)) => (
            StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body.clone(),
        ),
        None => (StatusCode::NOT_FOUND, String::new()),
    }
}

/// Client pointed at `provider` with a short timeout.
pub fn client_for(provider: &FakeProvider) -> wunderbridge::WundergroundClient {
    wunderbridge::WundergroundClient::with_options(
        API_KEY,
        provider.base_url(),
        Duration::from_secs(5),
    )
    .unwrap()
}
