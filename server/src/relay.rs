//! UDP-Relay vor dem Audio-Mixer
//!
//! Empfaengt RTP/RTCP-Datagramme, ordnet sie ueber die Absender-Adresse
//! einer Quelle zu und reicht sie an den Mixer weiter. Unbekannte Absender
//! werden beim ersten Datagramm als neue Quelle registriert.

use crate::config::PeerEinstellungen;
use crate::peers::{Peer, PeerFeedbackSink, PeerQuelle, PeerSender, PeerTable};
use mischpult_core::SourceId;
use mischpult_mixer::{AudioMixer, MediaSink};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Groesstes erwartetes Datagramm (Ethernet-MTU)
const UDP_BUFFER_SIZE: usize = 1500;

/// UDP-Relay: Socket, Gegenstellen und Mixer
pub struct UdpRelay {
    socket: Arc<UdpSocket>,
    mixer: Arc<AudioMixer>,
    peers: Arc<PeerTable>,
    einstellungen: PeerEinstellungen,
}

impl UdpRelay {
    /// `peers` muss dieselbe Tabelle sein, an die der Mixer ueber
    /// `FanoutReceiver` sendet.
    pub fn neu(
        socket: Arc<UdpSocket>,
        mixer: Arc<AudioMixer>,
        peers: Arc<PeerTable>,
        einstellungen: PeerEinstellungen,
    ) -> Self {
        Self {
            socket,
            mixer,
            peers,
            einstellungen,
        }
    }

    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn mixer(&self) -> &Arc<AudioMixer> {
        &self.mixer
    }

    pub fn peer_anzahl(&self) -> usize {
        self.peers.anzahl()
    }

    /// Startet die Empfangs-Loop (laeuft bis `shutdown_rx` ein Signal sendet)
    pub async fn empfangs_loop_starten(
        &self,
        mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
    ) {
        let mut buf = [0u8; UDP_BUFFER_SIZE];

        tracing::info!("Relay-Empfangs-Loop gestartet");

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, absender)) => {
                            self.datagramm_verarbeiten(&buf[..len], absender);
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "UDP-Empfangsfehler");
                            // Busy-Loop bei dauerhaftem Fehler vermeiden
                            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                        }
                    }
                }

                _ = &mut shutdown_rx => {
                    tracing::info!("Relay: Shutdown-Signal empfangen");
                    break;
                }
            }
        }

        tracing::info!("Relay-Empfangs-Loop beendet");
    }

    /// Verarbeitet ein Datagramm. Liefert die vom Mixer konsumierten Bytes.
    pub fn datagramm_verarbeiten(&self, daten: &[u8], absender: SocketAddr) -> usize {
        self.peers.zaehler().zaehlen("empfangen");

        let quelle = match self.peers.paket_empfangen(&absender) {
            Some(quelle) => quelle,
            None => match self.peer_registrieren(absender) {
                Some(quelle) => quelle,
                None => return 0,
            },
        };

        let konsumiert = self.mixer.deliver_audio_data(daten, &quelle);
        tracing::trace!(
            absender = %absender,
            bytes = daten.len(),
            konsumiert,
            "Datagramm an Mixer uebergeben"
        );
        konsumiert
    }

    /// Legt Sende-Task und Mixer-Quelle fuer einen neuen Absender an
    fn peer_registrieren(&self, absender: SocketAddr) -> Option<SourceId> {
        let sender = PeerSender::starten(
            Arc::clone(&self.socket),
            absender,
            self.einstellungen.send_queue_groesse,
            self.peers.zaehler().clone(),
        );
        let feedback = Arc::new(PeerFeedbackSink::neu(
            sender.queue(),
            self.peers.zaehler().clone(),
        ));
        let quelle = PeerQuelle::neu(SourceId::new(), feedback);

        // Ohne DashMap-Guard: der Mix-Thread liest die Tabelle parallel
        let id = mischpult_mixer::MediaSource::id(&quelle);
        match self.mixer.add_source(&quelle) {
            Ok(kanal) => {
                self.peers.einfuegen(absender, Peer::neu(id, sender));
                tracing::info!(
                    absender = %absender,
                    quelle = %id,
                    kanal = %kanal,
                    "Neue Gegenstelle registriert"
                );
                Some(id)
            }
            Err(e) => {
                tracing::warn!(
                    absender = %absender,
                    fehler = %e,
                    "Gegenstelle konnte nicht registriert werden"
                );
                None
            }
        }
    }

    /// Entfernt eine Gegenstelle samt Mixer-Quelle
    pub fn peer_entfernen(&self, adresse: &SocketAddr) -> bool {
        match self.peers.entfernen(adresse) {
            Some(peer) => {
                self.quelle_abmelden(*adresse, peer);
                true
            }
            None => false,
        }
    }

    /// Entfernt Gegenstellen ohne Paket innerhalb des Idle-Timeouts
    pub fn inaktive_bereinigen(&self) -> usize {
        let entfernt = self.peers.inaktive_entfernen(self.einstellungen.idle_timeout());
        let anzahl = entfernt.len();
        for (adresse, peer) in entfernt {
            tracing::warn!(absender = %adresse, "Inaktive Gegenstelle entfernt (Timeout)");
            self.quelle_abmelden(adresse, peer);
        }
        anzahl
    }

    /// Meldet alle Gegenstellen ab (Shutdown)
    pub fn alle_entfernen(&self) {
        for (adresse, peer) in self.peers.alle_entfernen() {
            self.quelle_abmelden(adresse, peer);
        }
    }

    fn quelle_abmelden(&self, adresse: SocketAddr, peer: Peer) {
        if let Err(e) = self.mixer.remove_source(&peer.quelle) {
            tracing::warn!(
                absender = %adresse,
                quelle = %peer.quelle,
                fehler = %e,
                "Quelle konnte nicht abgemeldet werden"
            );
        }
        // Sende-Task endet mit dem Drop von `peer`
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
