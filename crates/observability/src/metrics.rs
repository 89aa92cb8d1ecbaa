//! Prometheus-kompatible Metriken fuer Mischpult
//!
//! Registrierte Metriken:
//! - `mischpult_quellen_aktiv` – Gauge: Registrierte Quellen
//! - `mischpult_ausgang_sendet` – Gauge: 1 solange der Ausgangskanal sendet
//! - `mischpult_mix_schleife_aktiv` – Gauge: 1 solange die Mix-Schleife laeuft
//! - `mischpult_mix_ticks_total` – Counter: Ausgefuehrte Mix-Ticks
//! - `mischpult_frames_total` – Counter: Gemischte Frames (ergebnis)
//! - `mischpult_pakete_total` – Counter: Eingehende Pakete (ergebnis)
//! - `mischpult_peers_aktiv` – Gauge: Bekannte UDP-Gegenstellen
//! - `mischpult_datagramme_total` – Counter: UDP-Datagramme (richtung)
//!
//! Mixer-Zaehler sind Atomics im Mixer. [`MixerMetrics::uebernehmen`]
//! gleicht die Prometheus-Counter periodisch an einen Snapshot an.

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use mischpult_mixer::MixerStatsSnapshot;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Alle Mischpult-Prometheus-Metriken
#[derive(Clone)]
pub struct MixerMetrics {
    pub registry: Arc<Registry>,

    // Mixer
    pub quellen_aktiv: IntGauge,
    pub ausgang_sendet: IntGauge,
    pub mix_schleife_aktiv: IntGauge,
    pub mix_ticks_total: IntCounter,
    pub frames_total: IntCounterVec,
    pub pakete_total: IntCounterVec,

    // Relay
    pub peers_aktiv: IntGauge,
    pub datagramme_total: IntCounterVec,
}

/// Zieht einen Counter auf einen absoluten Stand nach
fn nachziehen(counter: &IntCounter, stand: u64) {
    let aktuell = counter.get();
    if stand > aktuell {
        counter.inc_by(stand - aktuell);
    }
}

impl MixerMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let quellen_aktiv = IntGauge::with_opts(Opts::new(
            "mischpult_quellen_aktiv",
            "Anzahl registrierter Quellen",
        ))?;
        registry.register(Box::new(quellen_aktiv.clone()))?;

        let ausgang_sendet = IntGauge::with_opts(Opts::new(
            "mischpult_ausgang_sendet",
            "1 solange der Ausgangskanal sendet",
        ))?;
        registry.register(Box::new(ausgang_sendet.clone()))?;

        let mix_schleife_aktiv = IntGauge::with_opts(Opts::new(
            "mischpult_mix_schleife_aktiv",
            "1 solange die Mix-Schleife laeuft",
        ))?;
        registry.register(Box::new(mix_schleife_aktiv.clone()))?;

        let mix_ticks_total = IntCounter::with_opts(Opts::new(
            "mischpult_mix_ticks_total",
            "Gesamtanzahl ausgefuehrter Mix-Ticks",
        ))?;
        registry.register(Box::new(mix_ticks_total.clone()))?;

        let frames_total = IntCounterVec::new(
            Opts::new("mischpult_frames_total", "Gemischte Frames nach Ergebnis"),
            &["ergebnis"],
        )?;
        registry.register(Box::new(frames_total.clone()))?;

        let pakete_total = IntCounterVec::new(
            Opts::new("mischpult_pakete_total", "Eingehende Pakete nach Ergebnis"),
            &["ergebnis"],
        )?;
        registry.register(Box::new(pakete_total.clone()))?;

        let peers_aktiv = IntGauge::with_opts(Opts::new(
            "mischpult_peers_aktiv",
            "Anzahl bekannter UDP-Gegenstellen",
        ))?;
        registry.register(Box::new(peers_aktiv.clone()))?;

        let datagramme_total = IntCounterVec::new(
            Opts::new("mischpult_datagramme_total", "UDP-Datagramme nach Richtung"),
            &["richtung"],
        )?;
        registry.register(Box::new(datagramme_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            quellen_aktiv,
            ausgang_sendet,
            mix_schleife_aktiv,
            mix_ticks_total,
            frames_total,
            pakete_total,
            peers_aktiv,
            datagramme_total,
        })
    }

    /// Uebernimmt einen Mixer-Snapshot
    pub fn uebernehmen(&self, stand: &MixerStatsSnapshot) {
        self.quellen_aktiv.set(stand.quellen as i64);
        self.ausgang_sendet.set(stand.sendet as i64);
        self.mix_schleife_aktiv.set(stand.schleife_laeuft as i64);
        nachziehen(&self.mix_ticks_total, stand.ticks);

        let frames = [
            ("gemischt", stand.frames_gemischt),
            ("fehlgeschlagen", stand.frames_fehlgeschlagen),
        ];
        for (ergebnis, wert) in frames {
            nachziehen(&self.frames_total.with_label_values(&[ergebnis]), wert);
        }

        let pakete = [
            ("rtp", stand.rtp_zugestellt),
            ("rtcp", stand.rtcp_zugestellt),
            ("verworfen", stand.pakete_verworfen),
            ("abgelehnt", stand.pakete_abgelehnt),
            ("protokollverletzung", stand.protokollverletzungen),
        ];
        for (ergebnis, wert) in pakete {
            nachziehen(&self.pakete_total.with_label_values(&[ergebnis]), wert);
        }
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: MixerMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<MixerMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
