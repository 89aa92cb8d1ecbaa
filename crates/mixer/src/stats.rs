//! Laufzeit-Zaehler des Mixers
//!
//! Reine Atomics, damit Mix-Thread und Dispatch-Threads ohne Lock zaehlen
//! koennen. Die Prometheus-Anbindung liest nur Snapshots.

use crate::scheduler::LoopState;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MixerStats {
    pub ticks: AtomicU64,
    pub frames_gemischt: AtomicU64,
    pub frames_fehlgeschlagen: AtomicU64,
    pub rtp_zugestellt: AtomicU64,
    pub rtcp_zugestellt: AtomicU64,
    /// Pakete unbekannter Quellen
    pub pakete_verworfen: AtomicU64,
    /// Von der Engine abgelehnte Pakete
    pub pakete_abgelehnt: AtomicU64,
    /// Feedback-Pakete auf dem Audio-Empfangspfad
    pub protokollverletzungen: AtomicU64,
}

impl MixerStats {
    pub fn zaehlen(zaehler: &AtomicU64) {
        zaehler.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, quellen: usize, sendet: bool, schleife: LoopState) -> MixerStatsSnapshot {
        let lesen = |z: &AtomicU64| z.load(Ordering::Relaxed);
        MixerStatsSnapshot {
            quellen,
            sendet,
            schleife_laeuft: schleife == LoopState::Running,
            ticks: lesen(&self.ticks),
            frames_gemischt: lesen(&self.frames_gemischt),
            frames_fehlgeschlagen: lesen(&self.frames_fehlgeschlagen),
            rtp_zugestellt: lesen(&self.rtp_zugestellt),
            rtcp_zugestellt: lesen(&self.rtcp_zugestellt),
            pakete_verworfen: lesen(&self.pakete_verworfen),
            pakete_abgelehnt: lesen(&self.pakete_abgelehnt),
            protokollverletzungen: lesen(&self.protokollverletzungen),
        }
    }
}

/// Momentaufnahme aller Zaehler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MixerStatsSnapshot {
    pub quellen: usize,
    pub sendet: bool,
    pub schleife_laeuft: bool,
    pub ticks: u64,
    pub frames_gemischt: u64,
    pub frames_fehlgeschlagen: u64,
    pub rtp_zugestellt: u64,
    pub rtcp_zugestellt: u64,
    pub pakete_verworfen: u64,
    pub pakete_abgelehnt: u64,
    pub protokollverletzungen: u64,
}
