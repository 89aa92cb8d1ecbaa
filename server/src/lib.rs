//! mischpult-server – Bibliotheks-Root
//!
//! Verdrahtet Software-Engine, Audio-Mixer, UDP-Relay und Observability
//! zu einem lauffaehigen Relay-Server.

pub mod config;
pub mod peers;
pub mod relay;

use anyhow::{Context, Result};
use config::ServerConfig;
use crossbeam_channel::Receiver;
use mischpult_core::{ConfigStore, MixerEvent};
use mischpult_mixer::{AudioMixer, SoftEngine, VoiceEngine};
use mischpult_observability::{HealthState, MixerMetrics};
use peers::{DatagrammZaehler, FanoutReceiver, PeerTable};
use relay::UdpRelay;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Kapazitaet des Ereignis-Kanals zwischen Mixer und Server
const EREIGNIS_PUFFER: usize = 256;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Subsysteme und laeuft bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        self.laufen_bis(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(fehler = %e, "Ctrl-C-Handler konnte nicht installiert werden");
            }
        })
        .await
    }

    /// Startet alle Subsysteme und laeuft bis `shutdown` fertig ist
    ///
    /// Reihenfolge:
    /// 1. UDP-Socket binden, Observability-Adresse pruefen, Ereignis-Logger starten
    /// 2. Engine und Mixer erstellen (startet den Mix-Thread)
    /// 3. Observability-Server, Bereinigung und Metrik-Abgleich starten
    /// 4. Empfangs-Loop bis zum Shutdown
    /// 5. Gegenstellen abmelden, Mixer auf einem Blocking-Thread beenden
    pub async fn laufen_bis<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let cfg = self.config;

        let metriken = MixerMetrics::neu()?;
        let health = HealthState::neu();

        let udp_adresse = cfg.udp_bind_adresse();
        let socket = Arc::new(
            UdpSocket::bind(&udp_adresse)
                .await
                .with_context(|| format!("UDP-Socket '{udp_adresse}' nicht bindbar"))?,
        );
        tracing::info!(adresse = %socket.local_addr()?, "UDP-Socket gebunden");

        let observability_adresse: Option<SocketAddr> = if cfg.observability.aktiviert {
            Some(
                cfg.observability_bind_adresse()
                    .parse()
                    .context("Ungueltige Observability-Adresse")?,
            )
        } else {
            None
        };

        let (event_tx, event_rx) = crossbeam_channel::bounded(EREIGNIS_PUFFER);
        let ereignisse = ereignis_logger_starten(event_rx)?;

        // Nach dem Mixer bricht nichts mehr mit `?` ab: sein Drop joint den
        // Mix-Thread und gehoert in den Blocking-Pool
        let peers = Arc::new(PeerTable::neu(DatagrammZaehler::neu(Some(metriken.clone()))));
        let engine: Arc<dyn VoiceEngine> = Arc::new(SoftEngine::neu(cfg.engine.clone()));
        let mixer = Arc::new(AudioMixer::with_events(
            Arc::new(FanoutReceiver::neu(peers.clone())),
            engine,
            Arc::new(ConfigStore::new(cfg.mixer.clone())),
            Some(event_tx),
        )?);

        let relay = Arc::new(UdpRelay::neu(
            socket,
            mixer.clone(),
            peers.clone(),
            cfg.peers.clone(),
        ));

        let mut hintergrund = Vec::new();

        if let Some(adresse) = observability_adresse {
            let (m, h) = (metriken.clone(), health.clone());
            hintergrund.push(tokio::spawn(async move {
                if let Err(e) = mischpult_observability::observability_server_starten(adresse, m, h).await {
                    tracing::error!(fehler = %e, "Observability-Server beendet");
                }
            }));
        }

        {
            let relay = relay.clone();
            let mut takt = tokio::time::interval(cfg.peers.bereinigung_intervall());
            hintergrund.push(tokio::spawn(async move {
                loop {
                    takt.tick().await;
                    relay.inaktive_bereinigen();
                }
            }));
        }

        {
            let (mixer, peers, metriken, health) =
                (mixer.clone(), peers.clone(), metriken.clone(), health.clone());
            let intervall = Duration::from_millis(cfg.observability.abgleich_intervall_ms.max(10));
            let mut takt = tokio::time::interval(intervall);
            hintergrund.push(tokio::spawn(async move {
                loop {
                    takt.tick().await;
                    let stand = mixer.stats();
                    metriken.uebernehmen(&stand);
                    metriken.peers_aktiv.set(peers.anzahl() as i64);
                    health.mixer_status_setzen(stand.schleife_laeuft, stand.quellen);
                }
            }));
        }

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let empfang = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.empfangs_loop_starten(shutdown_rx).await })
        };

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        shutdown.await;
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");

        let _ = shutdown_tx.send(());
        if let Err(e) = empfang.await {
            tracing::warn!(fehler = %e, "Empfangs-Task nicht sauber beendet");
        }
        for task in hintergrund {
            task.abort();
            let _ = task.await;
        }
        health.mixer_status_setzen(false, 0);

        relay.alle_entfernen();
        drop(relay);
        drop(peers);

        // Drop joint den Mix-Thread und darf die Runtime nicht blockieren
        tokio::task::spawn_blocking(move || drop(mixer))
            .await
            .context("Mixer konnte nicht beendet werden")?;

        if ereignisse.join().is_err() {
            tracing::warn!("Ereignis-Logger ist abgestuerzt");
        }

        tracing::info!("Server beendet");
        Ok(())
    }
}

/// Schreibt Mixer-Ereignisse ins Log, bis der Mixer den Kanal schliesst
fn ereignis_logger_starten(rx: Receiver<MixerEvent>) -> Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("mischpult-events".into())
        .spawn(move || {
            for ereignis in rx {
                match ereignis {
                    MixerEvent::SourceAdded { source, channel } => {
                        tracing::debug!(quelle = %source, kanal = %channel, "Quelle mischt mit")
                    }
                    MixerEvent::SourceRemoved { source, channel } => {
                        tracing::debug!(quelle = %source, kanal = %channel, "Quelle entfernt")
                    }
                    MixerEvent::SendingStarted => tracing::info!("Ausgangskanal sendet"),
                    MixerEvent::SendingStopped => tracing::info!("Ausgangskanal pausiert"),
                    MixerEvent::MixLoopStopped => tracing::info!("Mix-Schleife gestoppt"),
                }
            }
        })
        .context("Ereignis-Thread konnte nicht gestartet werden")
}
