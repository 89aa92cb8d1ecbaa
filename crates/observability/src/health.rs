//! Health-Check-Endpunkt fuer Mischpult
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und Zustand der Mix-Schleife

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub mixer_aktiv: bool,
    pub quellen: usize,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    pub start_time: Arc<Instant>,
    pub mixer_aktiv: Arc<AtomicBool>,
    pub quellen: Arc<AtomicUsize>,
}

impl HealthState {
    pub fn neu() -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            mixer_aktiv: Arc::new(AtomicBool::new(false)),
            quellen: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn mixer_laeuft(&self) -> bool {
        self.mixer_aktiv.load(Ordering::Relaxed)
    }

    pub fn mixer_status_setzen(&self, aktiv: bool, quellen: usize) {
        self.mixer_aktiv.store(aktiv, Ordering::Relaxed);
        self.quellen.store(quellen, Ordering::Relaxed);
    }

    pub fn antwort(&self) -> HealthResponse {
        let mixer_aktiv = self.mixer_laeuft();
        HealthResponse {
            status: if mixer_aktiv {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            mixer_aktiv,
            quellen: self.quellen.load(Ordering::Relaxed),
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::neu()
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – 503 solange die Mix-Schleife nicht laeuft
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let response = state.antwort();
    let http_status = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (http_status, Json(response))
}
