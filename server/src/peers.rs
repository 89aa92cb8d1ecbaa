//! UDP-Gegenstellen des Relays
//!
//! Jede Gegenstelle (identifiziert ueber ihre Absender-Adresse) ist genau
//! eine Quelle im Mixer und hat einen eigenen Sende-Task. Der gemischte
//! Strom geht ueber [`FanoutReceiver`] an alle Gegenstellen, RTCP-Feedback
//! fuer eine einzelne Quelle ueber deren [`PeerFeedbackSink`].
//!
//! ```text
//! Mix-Thread --> FanoutReceiver --try_send--> Sende-Queue (mpsc) --> send_to Task
//! Engine ------> PeerFeedbackSink --try_send-^
//! ```
//!
//! Alle Einspeisungen nutzen `try_send`: der Mix-Thread blockiert nie auf
//! einer langsamen Gegenstelle, volle Queues verwerfen das Paket.

use dashmap::DashMap;
use mischpult_core::SourceId;
use mischpult_mixer::{FeedbackSink, MediaSource, RtpDataReceiver};
use mischpult_observability::MixerMetrics;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

// ---------------------------------------------------------------------------
// Datagramm-Zaehler
// ---------------------------------------------------------------------------

/// Zaehlt UDP-Datagramme nach Richtung, sofern Metriken aktiv sind
#[derive(Clone, Default)]
pub struct DatagrammZaehler {
    metriken: Option<MixerMetrics>,
}

impl DatagrammZaehler {
    pub fn neu(metriken: Option<MixerMetrics>) -> Self {
        Self { metriken }
    }

    pub fn zaehlen(&self, richtung: &str) {
        if let Some(m) = &self.metriken {
            m.datagramme_total.with_label_values(&[richtung]).inc();
        }
    }
}

/// Legt ein Paket nicht-blockierend in eine Sende-Queue
fn einreihen(
    tx: &mpsc::Sender<Arc<Vec<u8>>>,
    daten: Arc<Vec<u8>>,
    zaehler: &DatagrammZaehler,
) -> bool {
    match tx.try_send(daten) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            zaehler.zaehlen("verworfen");
            false
        }
        // Sende-Task beendet, die Gegenstelle wird gerade entfernt
        Err(TrySendError::Closed(_)) => false,
    }
}

// ---------------------------------------------------------------------------
// PeerSender
// ---------------------------------------------------------------------------

/// Sende-Task einer Gegenstelle
///
/// Beim Drop wird der Task abgebrochen.
pub struct PeerSender {
    tx: mpsc::Sender<Arc<Vec<u8>>>,
    task: tokio::task::JoinHandle<()>,
}

impl PeerSender {
    /// Startet den Sende-Task fuer `ziel`. Muss innerhalb einer Tokio-Runtime
    /// aufgerufen werden.
    pub fn starten(
        socket: Arc<UdpSocket>,
        ziel: SocketAddr,
        queue_groesse: usize,
        zaehler: DatagrammZaehler,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<Arc<Vec<u8>>>(queue_groesse);

        let task = tokio::spawn(async move {
            while let Some(daten) = rx.recv().await {
                match socket.send_to(&daten, ziel).await {
                    Ok(_) => zaehler.zaehlen("gesendet"),
                    Err(e) => {
                        zaehler.zaehlen("sendefehler");
                        tracing::warn!(fehler = %e, ziel = %ziel, "UDP-Sendefehler");
                    }
                }
            }
            tracing::debug!(ziel = %ziel, "Sende-Task beendet");
        });

        Self { tx, task }
    }

    /// Klon der Sende-Queue
    pub fn queue(&self) -> mpsc::Sender<Arc<Vec<u8>>> {
        self.tx.clone()
    }
}

impl Drop for PeerSender {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Quelle und Feedback
// ---------------------------------------------------------------------------

/// RTCP-Rueckkanal zu genau einer Gegenstelle
pub struct PeerFeedbackSink {
    tx: mpsc::Sender<Arc<Vec<u8>>>,
    zaehler: DatagrammZaehler,
}

impl PeerFeedbackSink {
    pub fn neu(tx: mpsc::Sender<Arc<Vec<u8>>>, zaehler: DatagrammZaehler) -> Self {
        Self { tx, zaehler }
    }
}

impl FeedbackSink for PeerFeedbackSink {
    fn deliver_feedback(&self, paket: &[u8]) -> bool {
        einreihen(&self.tx, Arc::new(paket.to_vec()), &self.zaehler)
    }
}

/// Eine Gegenstelle in ihrer Rolle als Mixer-Quelle
pub struct PeerQuelle {
    id: SourceId,
    feedback: Arc<PeerFeedbackSink>,
}

impl PeerQuelle {
    pub fn neu(id: SourceId, feedback: Arc<PeerFeedbackSink>) -> Self {
        Self { id, feedback }
    }
}

impl MediaSource for PeerQuelle {
    fn id(&self) -> SourceId {
        self.id
    }

    fn feedback_sink(&self) -> Arc<dyn FeedbackSink> {
        self.feedback.clone()
    }
}

// ---------------------------------------------------------------------------
// PeerTable
// ---------------------------------------------------------------------------

/// Eine bekannte Gegenstelle
pub struct Peer {
    pub quelle: SourceId,
    pub sender: PeerSender,
    letztes_paket: Instant,
}

impl Peer {
    pub fn neu(quelle: SourceId, sender: PeerSender) -> Self {
        Self {
            quelle,
            sender,
            letztes_paket: Instant::now(),
        }
    }

    pub fn ist_inaktiv(&self, timeout: Duration) -> bool {
        self.letztes_paket.elapsed() > timeout
    }
}

/// Alle bekannten Gegenstellen, indexiert nach Absender-Adresse
///
/// Guards der DashMap werden nie ueber einen Mixer-Aufruf hinweg gehalten:
/// der Mix-Thread liest die Tabelle beim Fan-out, waehrend der Relay den
/// Mixer unter dessen Registry-Lock veraendert.
pub struct PeerTable {
    peers: DashMap<SocketAddr, Peer>,
    zaehler: DatagrammZaehler,
}

impl PeerTable {
    pub fn neu(zaehler: DatagrammZaehler) -> Self {
        Self {
            peers: DashMap::new(),
            zaehler,
        }
    }

    pub fn zaehler(&self) -> &DatagrammZaehler {
        &self.zaehler
    }

    /// Markiert ein eingegangenes Paket und liefert die Quelle der Gegenstelle
    pub fn paket_empfangen(&self, adresse: &SocketAddr) -> Option<SourceId> {
        let mut peer = self.peers.get_mut(adresse)?;
        peer.letztes_paket = Instant::now();
        Some(peer.quelle)
    }

    pub fn einfuegen(&self, adresse: SocketAddr, peer: Peer) {
        self.peers.insert(adresse, peer);
    }

    pub fn entfernen(&self, adresse: &SocketAddr) -> Option<Peer> {
        self.peers.remove(adresse).map(|(_, peer)| peer)
    }

    /// Entfernt alle Gegenstellen ohne Paket seit `timeout`
    pub fn inaktive_entfernen(&self, timeout: Duration) -> Vec<(SocketAddr, Peer)> {
        let inaktive: Vec<SocketAddr> = self
            .peers
            .iter()
            .filter(|e| e.ist_inaktiv(timeout))
            .map(|e| *e.key())
            .collect();

        inaktive
            .into_iter()
            .filter_map(|adresse| {
                self.peers
                    .remove_if(&adresse, |_, peer| peer.ist_inaktiv(timeout))
            })
            .collect()
    }

    /// Leert die Tabelle (Shutdown)
    pub fn alle_entfernen(&self) -> Vec<(SocketAddr, Peer)> {
        let adressen: Vec<SocketAddr> = self.peers.iter().map(|e| *e.key()).collect();
        adressen
            .into_iter()
            .filter_map(|adresse| self.peers.remove(&adresse))
            .collect()
    }

    pub fn anzahl(&self) -> usize {
        self.peers.len()
    }

    pub fn enthaelt(&self, adresse: &SocketAddr) -> bool {
        self.peers.contains_key(adresse)
    }
}

/// Netzwerk-Senke des Mixers: verteilt jedes Paket an alle Gegenstellen
pub struct FanoutReceiver {
    peers: Arc<PeerTable>,
}

impl FanoutReceiver {
    pub fn neu(peers: Arc<PeerTable>) -> Self {
        Self { peers }
    }
}

impl RtpDataReceiver for FanoutReceiver {
    fn receive_rtp_data(&self, paket: &[u8]) {
        let daten = Arc::new(paket.to_vec());
        let mut zugestellt = 0usize;
        for eintrag in self.peers.peers.iter() {
            if einreihen(&eintrag.sender.tx, Arc::clone(&daten), &self.peers.zaehler) {
                zugestellt += 1;
            }
        }
        tracing::trace!(bytes = paket.len(), empfaenger = zugestellt, "Mix-Paket verteilt");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
