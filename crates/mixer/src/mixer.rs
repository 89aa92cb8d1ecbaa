//! Audio-Mixer – Kanal-Lebenszyklus und Paket-Dispatch
//!
//! # Architektur
//!
//! ```text
//!  Quelle A --RTP--> deliver_audio_data --+
//!  Quelle B --RTP--> deliver_audio_data --+--> Eingangskanaele (Engine)
//!                                                     |
//!                     Mix-Thread (alle 10 ms) <-------+ need_more_play_data
//!                            |
//!                            +--> on_data --> Ausgangskanal --> RtpDataReceiver
//! ```
//!
//! Der Ausgangskanal lebt so lange wie der Mixer. Eingangskanaele entstehen
//! in `add_source` und verschwinden in `remove_source` oder beim Drop.
//! Der Ausgangskanal sendet genau dann, wenn mindestens eine Quelle
//! registriert ist.

use crate::config::MixerConfig;
use crate::engine::VoiceEngine;
use crate::error::{EngineResult, EngineStep, MixerError, MixerResult};
use crate::registry::{ChannelRegistry, VoiceChannel};
use crate::scheduler::{LoopState, MixScheduler, TickStatus};
use crate::stats::{MixerStats, MixerStatsSnapshot};
use crate::transport::{MediaSink, MediaSource, MediaTransport, RelayTransport, RtpDataReceiver};
use crossbeam_channel::Sender;
use mischpult_core::{ChannelHandle, ConfigStore, ListenerId, MixerEvent, SourceId};
use mischpult_protocol::{classify, PacketKind, SendCodec};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Kanal-Auf- und Abbau
// ---------------------------------------------------------------------------

/// Welche Teile eines Kanals beim Abbau zurueckgenommen werden
#[derive(Debug, Clone, Copy, Default)]
struct Aktiv {
    senden: bool,
    empfang: bool,
    playout: bool,
    transport: bool,
}

impl Aktiv {
    const EINGANG: Aktiv = Aktiv {
        senden: false,
        empfang: true,
        playout: true,
        transport: true,
    };

    const AUSGANG: Aktiv = Aktiv {
        senden: true,
        empfang: true,
        playout: false,
        transport: true,
    };
}

fn schritt_pruefen(kanal: ChannelHandle, schritt: &'static str, ergebnis: EngineResult<()>) {
    if let Err(e) = ergebnis {
        tracing::warn!(kanal = %kanal, schritt, fehler = %e, "Abbau-Schritt fehlgeschlagen");
    }
}

/// Baut einen Kanal ab: Playout, Senden, Empfang, Transport, Kanal
///
/// Best-effort: ein fehlgeschlagener Schritt haelt die folgenden nicht auf.
fn kanal_abbauen(engine: &dyn VoiceEngine, kanal: ChannelHandle, aktiv: Aktiv) {
    if aktiv.playout {
        schritt_pruefen(kanal, "StopPlayout", engine.stop_playout(kanal));
    }
    if aktiv.senden {
        schritt_pruefen(kanal, "StopSend", engine.stop_send(kanal));
    }
    if aktiv.empfang {
        schritt_pruefen(kanal, "StopReceive", engine.stop_receive(kanal));
    }
    if aktiv.transport {
        schritt_pruefen(
            kanal,
            "DeRegisterExternalTransport",
            engine.deregister_external_transport(kanal),
        );
    }
    schritt_pruefen(kanal, "DeleteChannel", engine.delete_channel(kanal));
}

/// Kanal im Aufbau
///
/// Wird der Aufbau nicht mit [`behalten`](Self::behalten) abgeschlossen,
/// nimmt der Drop alle bereits erfolgten Schritte zurueck.
struct KanalAufbau<'a> {
    engine: &'a dyn VoiceEngine,
    kanal: ChannelHandle,
    aktiv: Aktiv,
    behalten: bool,
}

impl<'a> KanalAufbau<'a> {
    fn anlegen(engine: &'a dyn VoiceEngine) -> MixerResult<Self> {
        let kanal = engine
            .create_channel()
            .map_err(|e| MixerError::engine(EngineStep::CreateChannel, e))?;
        Ok(Self {
            engine,
            kanal,
            aktiv: Aktiv::default(),
            behalten: false,
        })
    }

    fn transport_registrieren(&mut self, transport: Arc<dyn MediaTransport>) -> MixerResult<()> {
        self.engine
            .register_external_transport(self.kanal, transport)
            .map_err(|e| MixerError::engine(EngineStep::RegisterTransport, e))?;
        self.aktiv.transport = true;
        Ok(())
    }

    fn codec_setzen(&mut self, codec: &SendCodec) -> MixerResult<()> {
        self.engine
            .set_send_codec(self.kanal, codec)
            .map_err(|e| MixerError::engine(EngineStep::SetSendCodec, e))
    }

    fn empfang_starten(&mut self) -> MixerResult<()> {
        self.engine
            .start_receive(self.kanal)
            .map_err(|e| MixerError::engine(EngineStep::StartReceive, e))?;
        self.aktiv.empfang = true;
        Ok(())
    }

    fn playout_starten(&mut self) -> MixerResult<()> {
        self.engine
            .start_playout(self.kanal)
            .map_err(|e| MixerError::engine(EngineStep::StartPlayout, e))?;
        self.aktiv.playout = true;
        Ok(())
    }

    fn behalten(mut self) -> ChannelHandle {
        self.behalten = true;
        self.kanal
    }
}

impl Drop for KanalAufbau<'_> {
    fn drop(&mut self) {
        if !self.behalten {
            tracing::debug!(kanal = %self.kanal, "Teilweise angelegten Kanal zurueckbauen");
            kanal_abbauen(self.engine, self.kanal, self.aktiv);
        }
    }
}

fn engine_beenden(engine: &dyn VoiceEngine) {
    if let Err(e) = engine.terminate() {
        tracing::error!(fehler = %e, "Voice-Engine konnte nicht beendet werden");
    }
}

fn ereignis_senden(events: &Option<Sender<MixerEvent>>, ereignis: MixerEvent) {
    if let Some(tx) = events {
        if tx.try_send(ereignis).is_err() {
            tracing::trace!("Mixer-Ereignis verworfen (Kanal voll oder geschlossen)");
        }
    }
}

// ---------------------------------------------------------------------------
// MixLoop
// ---------------------------------------------------------------------------

/// Tick-Handler des Mix-Threads
pub struct MixLoop {
    engine: Arc<dyn VoiceEngine>,
    ausgang: ChannelHandle,
    intervall: Duration,
    stats: Arc<MixerStats>,
    events: Option<Sender<MixerEvent>>,
}

impl MixLoop {
    /// Ein Tick: Frame aus der Engine ziehen und auf den Ausgangskanal geben
    pub fn perform_mix(&mut self, status: TickStatus) {
        match status {
            TickStatus::Expired => self.mischen(),
            TickStatus::Cancelled => {
                tracing::info!("Mix-Schleife abgebrochen, kein weiterer Tick");
                ereignis_senden(&self.events, MixerEvent::MixLoopStopped);
            }
            TickStatus::Disconnected => {
                tracing::warn!("Mix-Schleife ohne Abbruch-Signal beendet");
                ereignis_senden(&self.events, MixerEvent::MixLoopStopped);
            }
        }
    }

    fn mischen(&self) {
        MixerStats::zaehlen(&self.stats.ticks);

        let codec = match self.engine.send_codec(self.ausgang) {
            Ok(codec) => codec,
            Err(e) => {
                tracing::trace!(fehler = %e, "Kein Sende-Codec, Tick uebersprungen");
                return;
            }
        };

        let samples = codec.samples_per_channel(self.intervall);
        let frame = match self.engine.need_more_play_data(
            samples,
            codec.channels.anzahl(),
            codec.plfreq(),
        ) {
            Ok(frame) => frame,
            Err(e) => {
                MixerStats::zaehlen(&self.stats.frames_fehlgeschlagen);
                tracing::debug!(fehler = %e, "NeedMorePlayData fehlgeschlagen");
                return;
            }
        };

        match self.engine.on_data(self.ausgang, &frame) {
            Ok(()) => MixerStats::zaehlen(&self.stats.frames_gemischt),
            Err(e) => {
                MixerStats::zaehlen(&self.stats.frames_fehlgeschlagen);
                tracing::debug!(fehler = %e, "Gemischter Frame nicht uebernommen");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AudioMixer
// ---------------------------------------------------------------------------

/// Mischt alle registrierten Quellen zu einem ausgehenden RTP-Strom
pub struct AudioMixer {
    engine: Arc<dyn VoiceEngine>,
    ausgang: VoiceChannel,
    registry: ChannelRegistry,
    scheduler: MixScheduler,
    /// Nur unter dem Schreib-Lock der Registry geaendert
    sendet: AtomicBool,
    stats: Arc<MixerStats>,
    config: Arc<ConfigStore<MixerConfig>>,
    config_listener: ListenerId,
    events: Option<Sender<MixerEvent>>,
}

impl AudioMixer {
    /// Erstellt den Mixer und startet den Mix-Thread
    ///
    /// Gemischte Pakete gehen an `receiver`.
    pub fn new(
        receiver: Arc<dyn RtpDataReceiver>,
        engine: Arc<dyn VoiceEngine>,
        config: Arc<ConfigStore<MixerConfig>>,
    ) -> MixerResult<Self> {
        Self::with_events(receiver, engine, config, None)
    }

    /// Wie [`new`](Self::new), veroeffentlicht zusaetzlich [`MixerEvent`]s
    pub fn with_events(
        receiver: Arc<dyn RtpDataReceiver>,
        engine: Arc<dyn VoiceEngine>,
        config: Arc<ConfigStore<MixerConfig>>,
        events: Option<Sender<MixerEvent>>,
    ) -> MixerResult<Self> {
        let cfg = config.get();
        cfg.validieren()?;

        engine
            .init()
            .map_err(|e| MixerError::engine(EngineStep::Init, e))?;

        let ausgang = match Self::ausgang_anlegen(&*engine, receiver, &cfg.send_codec) {
            Ok(ausgang) => ausgang,
            Err(e) => {
                engine_beenden(&*engine);
                return Err(e);
            }
        };

        let schwach = Arc::downgrade(&engine);
        let ausgang_handle = ausgang.handle;
        let config_listener = config.register_listener(move |neu: &MixerConfig| {
            let Some(engine) = schwach.upgrade() else {
                return;
            };
            match engine.set_send_codec(ausgang_handle, &neu.send_codec) {
                Ok(()) => tracing::info!(
                    codec = neu.send_codec.format.name(),
                    payload_type = neu.send_codec.payload_type,
                    "Sende-Codec aktualisiert"
                ),
                Err(e) => tracing::warn!(fehler = %e, "Neuer Sende-Codec abgelehnt"),
            }
        });

        let stats = Arc::new(MixerStats::default());
        let mut mix_loop = MixLoop {
            engine: engine.clone(),
            ausgang: ausgang.handle,
            intervall: cfg.mix_intervall(),
            stats: stats.clone(),
            events: events.clone(),
        };

        let scheduler =
            match MixScheduler::start(cfg.mix_intervall(), move |s| mix_loop.perform_mix(s)) {
                Ok(scheduler) => scheduler,
                Err(e) => {
                    config.unregister_listener(config_listener);
                    kanal_abbauen(&*engine, ausgang.handle, Aktiv::AUSGANG);
                    engine_beenden(&*engine);
                    return Err(MixerError::Thread(e));
                }
            };

        tracing::info!(
            ausgang = %ausgang.handle,
            intervall_ms = cfg.mix_intervall_ms,
            codec = cfg.send_codec.format.name(),
            "Audio-Mixer gestartet"
        );

        Ok(Self {
            engine,
            ausgang,
            registry: ChannelRegistry::neu(),
            scheduler,
            sendet: AtomicBool::new(false),
            stats,
            config,
            config_listener,
            events,
        })
    }

    fn ausgang_anlegen(
        engine: &dyn VoiceEngine,
        receiver: Arc<dyn RtpDataReceiver>,
        codec: &SendCodec,
    ) -> MixerResult<VoiceChannel> {
        engine
            .set_external_recording(true)
            .and_then(|()| engine.set_external_playout(true))
            .map_err(|e| MixerError::engine(EngineStep::ExternalMedia, e))?;

        let transport: Arc<dyn MediaTransport> = Arc::new(RelayTransport::outbound(receiver));
        let mut aufbau = KanalAufbau::anlegen(engine)?;
        aufbau.transport_registrieren(transport.clone())?;
        aufbau.codec_setzen(codec)?;
        Ok(VoiceChannel::neu(aufbau.behalten(), transport))
    }

    /// Registriert eine Quelle und liefert ihren Engine-Kanal
    ///
    /// Scheitert ein Schritt, werden alle vorherigen zurueckgenommen; die
    /// Quelle wird dann nicht gemischt.
    pub fn add_source(&self, quelle: &dyn MediaSource) -> MixerResult<ChannelHandle> {
        let id = quelle.id();
        if self.registry.enthaelt(&id) {
            return Err(MixerError::QuelleDoppelt(id));
        }

        let transport: Arc<dyn MediaTransport> =
            Arc::new(RelayTransport::feedback(quelle.feedback_sink()));
        let mut aufbau = KanalAufbau::anlegen(&*self.engine)?;
        aufbau.transport_registrieren(transport.clone())?;
        aufbau.empfang_starten()?;
        aufbau.playout_starten()?;

        let mut tabelle = self.registry.schreiben();
        if tabelle.contains_key(&id) {
            return Err(MixerError::QuelleDoppelt(id));
        }

        // Erste Quelle: ohne sendenden Ausgang wird sie nicht aufgenommen
        let gestartet = !self.sendet.load(Ordering::Acquire);
        if gestartet {
            self.senden_starten()
                .map_err(|e| MixerError::engine(EngineStep::StartSend, e))?;
        }
        let kanal = aufbau.behalten();
        tabelle.insert(id, VoiceChannel::neu(kanal, transport));
        let anzahl = tabelle.len();
        drop(tabelle);

        tracing::info!(quelle = %id, kanal = %kanal, quellen = anzahl, "Quelle hinzugefuegt");
        ereignis_senden(&self.events, MixerEvent::SourceAdded { source: id, channel: kanal });
        if gestartet {
            ereignis_senden(&self.events, MixerEvent::SendingStarted);
        }
        Ok(kanal)
    }

    /// Entfernt eine Quelle und baut ihren Kanal ab
    pub fn remove_source(&self, id: &SourceId) -> MixerResult<()> {
        let mut tabelle = self.registry.schreiben();
        let kanal = tabelle
            .remove(id)
            .ok_or(MixerError::QuelleUnbekannt(*id))?;

        kanal_abbauen(&*self.engine, kanal.handle, Aktiv::EINGANG);

        let gestoppt = tabelle.is_empty() && self.senden_stoppen();
        let anzahl = tabelle.len();
        drop(tabelle);

        tracing::info!(quelle = %id, kanal = %kanal.handle, quellen = anzahl, "Quelle entfernt");
        ereignis_senden(
            &self.events,
            MixerEvent::SourceRemoved {
                source: *id,
                channel: kanal.handle,
            },
        );
        if gestoppt {
            ereignis_senden(&self.events, MixerEvent::SendingStopped);
        }
        Ok(())
    }

    /// Nur unter dem Schreib-Lock aufrufen
    fn senden_starten(&self) -> EngineResult<()> {
        if let Err(e) = self.engine.start_send(self.ausgang.handle) {
            tracing::error!(fehler = %e, "StartSend auf dem Ausgangskanal fehlgeschlagen");
            return Err(e);
        }
        self.sendet.store(true, Ordering::Release);
        tracing::debug!(ausgang = %self.ausgang.handle, "Ausgangskanal sendet");
        Ok(())
    }

    /// Nur unter dem Schreib-Lock aufrufen
    fn senden_stoppen(&self) -> bool {
        if !self.sendet.swap(false, Ordering::AcqRel) {
            return false;
        }
        if let Err(e) = self.engine.stop_send(self.ausgang.handle) {
            tracing::warn!(fehler = %e, "StopSend auf dem Ausgangskanal fehlgeschlagen");
        }
        tracing::debug!(ausgang = %self.ausgang.handle, "Ausgangskanal sendet nicht mehr");
        true
    }

    /// `true` solange der Ausgangskanal sendet
    pub fn is_sending(&self) -> bool {
        self.sendet.load(Ordering::Acquire)
    }

    pub fn quellen_anzahl(&self) -> usize {
        self.registry.anzahl()
    }

    pub fn kanal_von(&self, id: &SourceId) -> Option<ChannelHandle> {
        self.registry.handle_von(id)
    }

    pub fn ausgangskanal(&self) -> ChannelHandle {
        self.ausgang.handle
    }

    pub fn schleifen_zustand(&self) -> LoopState {
        self.scheduler.zustand()
    }

    pub fn config(&self) -> &Arc<ConfigStore<MixerConfig>> {
        &self.config
    }

    pub fn stats(&self) -> MixerStatsSnapshot {
        self.stats
            .snapshot(self.quellen_anzahl(), self.is_sending(), self.schleifen_zustand())
    }
}

impl MediaSink for AudioMixer {
    /// Reicht ein Paket an den Kanal der Quelle weiter
    ///
    /// Sender Reports gehen an den RTCP-Pfad, alles andere an den RTP-Pfad.
    /// Liefert die Paketlaenge oder 0, wenn das Paket verworfen wurde.
    fn deliver_audio_data(&self, paket: &[u8], quelle: &SourceId) -> usize {
        let tabelle = self.registry.lesen();
        let Some(kanal) = tabelle.get(quelle) else {
            // Quelle wurde eventuell gerade entfernt
            MixerStats::zaehlen(&self.stats.pakete_verworfen);
            tracing::trace!(quelle = %quelle, "Paket fuer unbekannte Quelle verworfen");
            return 0;
        };

        let art = match classify(paket) {
            Ok(art) => art,
            Err(e) => {
                MixerStats::zaehlen(&self.stats.pakete_abgelehnt);
                tracing::debug!(quelle = %quelle, fehler = %e, "Paket ohne Typ-Feld");
                return 0;
            }
        };

        match art {
            PacketKind::SenderReport => {
                match self.engine.received_rtcp_packet(kanal.handle, paket) {
                    Ok(()) => MixerStats::zaehlen(&self.stats.rtcp_zugestellt),
                    Err(e) => {
                        tracing::debug!(quelle = %quelle, fehler = %e, "RTCP von Engine ignoriert")
                    }
                }
                paket.len()
            }
            PacketKind::Feedback(pt) => {
                MixerStats::zaehlen(&self.stats.protokollverletzungen);
                tracing::warn!(
                    quelle = %quelle,
                    pakettyp = pt,
                    "Feedback-Paket auf dem Audio-Empfangspfad verworfen"
                );
                0
            }
            PacketKind::Media => match self.engine.received_rtp_packet(kanal.handle, paket) {
                Ok(()) => {
                    MixerStats::zaehlen(&self.stats.rtp_zugestellt);
                    paket.len()
                }
                Err(e) => {
                    MixerStats::zaehlen(&self.stats.pakete_abgelehnt);
                    tracing::debug!(quelle = %quelle, fehler = %e, "RTP-Paket abgelehnt");
                    0
                }
            },
        }
    }

    /// Video gehoert nie auf den Audio-Pfad
    ///
    /// # Panics
    /// Immer. Ein Aufruf ist ein Programmierfehler beim Aufrufer.
    fn deliver_video_data(&self, paket: &[u8], quelle: &SourceId) -> usize {
        panic!(
            "Videodaten ({} Bytes, {}) an den Audio-Mixer geliefert",
            paket.len(),
            quelle
        );
    }
}

impl Drop for AudioMixer {
    fn drop(&mut self) {
        tracing::info!("Audio-Mixer wird beendet");

        // Zustand auf Draining, dann Abbruch, dann Join
        self.scheduler.stoppen();
        self.config.unregister_listener(self.config_listener);

        kanal_abbauen(&*self.engine, self.ausgang.handle, Aktiv::AUSGANG);
        self.sendet.store(false, Ordering::Release);

        let mut tabelle = self.registry.schreiben();
        for (quelle, kanal) in tabelle.drain() {
            tracing::debug!(quelle = %quelle, kanal = %kanal.handle, "Eingangskanal abgebaut");
            kanal_abbauen(&*self.engine, kanal.handle, Aktiv::EINGANG);
        }
        drop(tabelle);

        engine_beenden(&*self.engine);
        tracing::info!("Audio-Mixer beendet");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
