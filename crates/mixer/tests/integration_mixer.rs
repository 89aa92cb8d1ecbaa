//! Integration-Tests fuer AudioMixer gegen eine aufzeichnende Engine

use mischpult_core::{ChannelHandle, ConfigStore, MixerEvent, SourceId};
use mischpult_mixer::{
    AudioFrame, AudioMixer, EngineError, EngineResult, EngineStep, FeedbackSink, MediaSink,
    MediaSource, MediaTransport, MixerConfig, MixerError, RtpDataReceiver, VoiceEngine,
};
use mischpult_protocol::SendCodec;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Aufzeichnende Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Aufruf {
    Init,
    Terminate,
    Create(ChannelHandle),
    Delete(ChannelHandle),
    StartSend(ChannelHandle),
    StopSend(ChannelHandle),
    StartReceive(ChannelHandle),
    StopReceive(ChannelHandle),
    StartPlayout(ChannelHandle),
    StopPlayout(ChannelHandle),
    Register(ChannelHandle),
    Deregister(ChannelHandle),
    Rtp(ChannelHandle),
    Rtcp(ChannelHandle),
}

struct MockEngine {
    max: usize,
    aufrufe: Mutex<Vec<Aufruf>>,
    lebend: Mutex<BTreeSet<u32>>,
    fehler_bei: Mutex<Option<EngineStep>>,
    rtp_ablehnen: AtomicBool,
    pulls: AtomicUsize,
    frames: AtomicUsize,
}

impl MockEngine {
    fn neu(max: usize) -> Arc<Self> {
        Arc::new(Self {
            max,
            aufrufe: Mutex::new(Vec::new()),
            lebend: Mutex::new(BTreeSet::new()),
            fehler_bei: Mutex::new(None),
            rtp_ablehnen: AtomicBool::new(false),
            pulls: AtomicUsize::new(0),
            frames: AtomicUsize::new(0),
        })
    }

    fn protokoll(&self, aufruf: Aufruf) {
        self.aufrufe.lock().push(aufruf);
    }

    fn scheitern_bei(&self, schritt: EngineStep) {
        *self.fehler_bei.lock() = Some(schritt);
    }

    fn nicht_mehr_scheitern(&self) {
        *self.fehler_bei.lock() = None;
    }

    /// Zuletzt angelegter Kanal
    fn zuletzt_angelegt(&self) -> ChannelHandle {
        self.aufrufe()
            .into_iter()
            .rev()
            .find_map(|a| match a {
                Aufruf::Create(k) => Some(k),
                _ => None,
            })
            .expect("kein Kanal angelegt")
    }

    /// Alle Aufrufe, die einen bestimmten Kanal betreffen
    fn aufrufe_fuer(&self, kanal: ChannelHandle) -> Vec<Aufruf> {
        self.aufrufe()
            .into_iter()
            .filter(|a| match a {
                Aufruf::Create(k)
                | Aufruf::Delete(k)
                | Aufruf::StartSend(k)
                | Aufruf::StopSend(k)
                | Aufruf::StartReceive(k)
                | Aufruf::StopReceive(k)
                | Aufruf::StartPlayout(k)
                | Aufruf::StopPlayout(k)
                | Aufruf::Register(k)
                | Aufruf::Deregister(k)
                | Aufruf::Rtp(k)
                | Aufruf::Rtcp(k) => *k == kanal,
                Aufruf::Init | Aufruf::Terminate => false,
            })
            .collect()
    }

    fn pruefen(&self, schritt: EngineStep, kanal: ChannelHandle) -> EngineResult<()> {
        if *self.fehler_bei.lock() == Some(schritt) {
            return Err(EngineError::UnbekannterKanal(kanal));
        }
        if !self.lebend.lock().contains(&kanal.0) {
            return Err(EngineError::UnbekannterKanal(kanal));
        }
        Ok(())
    }

    fn aufrufe(&self) -> Vec<Aufruf> {
        self.aufrufe.lock().clone()
    }

    fn lebende_kanaele(&self) -> usize {
        self.lebend.lock().len()
    }

    /// StartSend/StopSend-Folge auf einem Kanal
    fn sende_wechsel(&self, kanal: ChannelHandle) -> Vec<bool> {
        self.aufrufe()
            .into_iter()
            .filter_map(|a| match a {
                Aufruf::StartSend(k) if k == kanal => Some(true),
                Aufruf::StopSend(k) if k == kanal => Some(false),
                _ => None,
            })
            .collect()
    }
}

impl VoiceEngine for MockEngine {
    fn init(&self) -> EngineResult<()> {
        self.protokoll(Aufruf::Init);
        Ok(())
    }

    fn terminate(&self) -> EngineResult<()> {
        self.protokoll(Aufruf::Terminate);
        match self.lebend.lock().len() {
            0 => Ok(()),
            n => Err(EngineError::KanaeleAktiv(n)),
        }
    }

    fn set_external_recording(&self, _: bool) -> EngineResult<()> {
        Ok(())
    }

    fn set_external_playout(&self, _: bool) -> EngineResult<()> {
        Ok(())
    }

    fn create_channel(&self) -> EngineResult<ChannelHandle> {
        if *self.fehler_bei.lock() == Some(EngineStep::CreateChannel) {
            return Err(EngineError::NichtUnterstuetzt("Test".into()));
        }
        let mut lebend = self.lebend.lock();
        let frei = (0..self.max as u32)
            .find(|i| !lebend.contains(i))
            .ok_or(EngineError::KanaeleErschoepft { max: self.max })?;
        lebend.insert(frei);
        drop(lebend);
        self.protokoll(Aufruf::Create(ChannelHandle(frei)));
        Ok(ChannelHandle(frei))
    }

    fn delete_channel(&self, kanal: ChannelHandle) -> EngineResult<()> {
        self.protokoll(Aufruf::Delete(kanal));
        if self.lebend.lock().remove(&kanal.0) {
            Ok(())
        } else {
            Err(EngineError::UnbekannterKanal(kanal))
        }
    }

    fn start_send(&self, kanal: ChannelHandle) -> EngineResult<()> {
        if *self.fehler_bei.lock() == Some(EngineStep::StartSend) {
            return Err(EngineError::NichtUnterstuetzt("Test".into()));
        }
        self.protokoll(Aufruf::StartSend(kanal));
        Ok(())
    }

    fn stop_send(&self, kanal: ChannelHandle) -> EngineResult<()> {
        self.protokoll(Aufruf::StopSend(kanal));
        Ok(())
    }

    fn start_receive(&self, kanal: ChannelHandle) -> EngineResult<()> {
        self.pruefen(EngineStep::StartReceive, kanal)?;
        self.protokoll(Aufruf::StartReceive(kanal));
        Ok(())
    }

    fn stop_receive(&self, kanal: ChannelHandle) -> EngineResult<()> {
        self.protokoll(Aufruf::StopReceive(kanal));
        Ok(())
    }

    fn start_playout(&self, kanal: ChannelHandle) -> EngineResult<()> {
        self.pruefen(EngineStep::StartPlayout, kanal)?;
        self.protokoll(Aufruf::StartPlayout(kanal));
        Ok(())
    }

    fn stop_playout(&self, kanal: ChannelHandle) -> EngineResult<()> {
        self.protokoll(Aufruf::StopPlayout(kanal));
        Ok(())
    }

    fn register_external_transport(
        &self,
        kanal: ChannelHandle,
        _: Arc<dyn MediaTransport>,
    ) -> EngineResult<()> {
        self.pruefen(EngineStep::RegisterTransport, kanal)?;
        self.protokoll(Aufruf::Register(kanal));
        Ok(())
    }

    fn deregister_external_transport(&self, kanal: ChannelHandle) -> EngineResult<()> {
        self.protokoll(Aufruf::Deregister(kanal));
        Ok(())
    }

    fn received_rtp_packet(&self, kanal: ChannelHandle, _: &[u8]) -> EngineResult<()> {
        self.protokoll(Aufruf::Rtp(kanal));
        if self.rtp_ablehnen.load(Ordering::SeqCst) {
            return Err(EngineError::UngueltigesPaket("abgelehnt".into()));
        }
        Ok(())
    }

    fn received_rtcp_packet(&self, kanal: ChannelHandle, _: &[u8]) -> EngineResult<()> {
        self.protokoll(Aufruf::Rtcp(kanal));
        Ok(())
    }

    fn send_codec(&self, _: ChannelHandle) -> EngineResult<SendCodec> {
        Ok(SendCodec::pcmu())
    }

    fn set_send_codec(&self, _: ChannelHandle, _: &SendCodec) -> EngineResult<()> {
        Ok(())
    }

    fn need_more_play_data(
        &self,
        samples_per_channel: usize,
        channels: u8,
        sample_rate: u32,
    ) -> EngineResult<AudioFrame> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        Ok(AudioFrame::stille(samples_per_channel, channels, sample_rate))
    }

    fn on_data(&self, _: ChannelHandle, frame: &AudioFrame) -> EngineResult<()> {
        assert_eq!(frame.samples_per_channel(), 80, "10 ms bei 8 kHz");
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Hilfen
// ---------------------------------------------------------------------------

struct Netz;

impl RtpDataReceiver for Netz {
    fn receive_rtp_data(&self, _: &[u8]) {}
}

impl FeedbackSink for Netz {
    fn deliver_feedback(&self, _: &[u8]) -> bool {
        true
    }
}

struct Quelle(SourceId);

impl Quelle {
    fn neu() -> Self {
        Self(SourceId::new())
    }
}

impl MediaSource for Quelle {
    fn id(&self) -> SourceId {
        self.0
    }
    fn feedback_sink(&self) -> Arc<dyn FeedbackSink> {
        Arc::new(Netz)
    }
}

fn mixer(engine: &Arc<MockEngine>) -> AudioMixer {
    AudioMixer::new(
        Arc::new(Netz),
        engine.clone(),
        Arc::new(ConfigStore::new(MixerConfig::default())),
    )
    .unwrap()
}

fn rtp(pt_byte: u8) -> Vec<u8> {
    let mut paket = vec![0u8; 172];
    paket[0] = 0x80;
    paket[1] = pt_byte;
    paket
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn gleichzeitiges_hinzufuegen_und_entfernen() {
    let engine = MockEngine::neu(64);
    let mixer = Arc::new(mixer(&engine));
    let ausgang = mixer.ausgangskanal();

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let mixer = mixer.clone();
            std::thread::spawn(move || {
                for _ in 0..25 {
                    let quellen: Vec<_> = (0..3).map(|_| Quelle::neu()).collect();
                    let mut handles = BTreeSet::new();
                    for q in &quellen {
                        let kanal = mixer.add_source(q).unwrap();
                        assert_ne!(kanal, ausgang);
                        assert!(handles.insert(kanal));
                        assert!(mixer.is_sending());
                    }
                    for q in &quellen {
                        mixer.remove_source(&q.0).unwrap();
                    }
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(mixer.quellen_anzahl(), 0);
    assert!(!mixer.is_sending());

    // Start und Stopp wechseln sich strikt ab und enden mit Stopp
    let wechsel = engine.sende_wechsel(ausgang);
    assert!(!wechsel.is_empty());
    for paar in wechsel.windows(2) {
        assert_ne!(paar[0], paar[1], "Sende-Zustand doppelt umgeschaltet");
    }
    assert_eq!(wechsel.first(), Some(&true));
    assert_eq!(wechsel.last(), Some(&false));
    assert_eq!(engine.lebende_kanaele(), 1);
}

#[test]
fn erste_und_letzte_quelle_schalten_senden() {
    let engine = MockEngine::neu(8);
    let mixer = mixer(&engine);
    let ausgang = mixer.ausgangskanal();
    let (a, b, c) = (Quelle::neu(), Quelle::neu(), Quelle::neu());

    mixer.add_source(&a).unwrap();
    assert_eq!(engine.sende_wechsel(ausgang), vec![true]);

    mixer.add_source(&b).unwrap();
    mixer.remove_source(&a.0).unwrap();
    mixer.add_source(&c).unwrap();
    assert_eq!(engine.sende_wechsel(ausgang), vec![true]);

    mixer.remove_source(&b.0).unwrap();
    mixer.remove_source(&c.0).unwrap();
    assert_eq!(engine.sende_wechsel(ausgang), vec![true, false]);
    assert!(!mixer.is_sending());
}

#[test]
fn zweites_entfernen_meldet_unbekannt() {
    let engine = MockEngine::neu(8);
    let mixer = mixer(&engine);
    let quelle = Quelle::neu();
    mixer.add_source(&quelle).unwrap();

    assert!(mixer.remove_source(&quelle.0).is_ok());
    assert!(matches!(
        mixer.remove_source(&quelle.0),
        Err(MixerError::QuelleUnbekannt(id)) if id == quelle.0
    ));
}

#[test]
fn entfernen_baut_in_reihenfolge_ab() {
    let engine = MockEngine::neu(8);
    let mixer = mixer(&engine);
    let quelle = Quelle::neu();
    let kanal = mixer.add_source(&quelle).unwrap();

    let vorher = engine.aufrufe().len();
    mixer.remove_source(&quelle.0).unwrap();
    let abbau: Vec<_> = engine.aufrufe()[vorher..]
        .iter()
        .copied()
        .filter(|a| !matches!(a, Aufruf::StopSend(_)))
        .collect();
    assert_eq!(
        abbau,
        vec![
            Aufruf::StopPlayout(kanal),
            Aufruf::StopReceive(kanal),
            Aufruf::Deregister(kanal),
            Aufruf::Delete(kanal),
        ]
    );
}

#[test]
fn sender_report_geht_an_rtcp_pfad() {
    let engine = MockEngine::neu(8);
    let mixer = mixer(&engine);
    let quelle = Quelle::neu();
    let kanal = mixer.add_source(&quelle).unwrap();

    let sr = rtp(200);
    assert_eq!(mixer.deliver_audio_data(&sr, &quelle.0), sr.len());

    // PCMU, Marker + dynamischer Typ, SDES: alles RTP-Pfad
    for pt_byte in [0u8, 0x80 | 96, 202] {
        let paket = rtp(pt_byte);
        assert_eq!(mixer.deliver_audio_data(&paket, &quelle.0), paket.len());
    }

    let pfade: Vec<_> = engine
        .aufrufe()
        .into_iter()
        .filter(|a| matches!(a, Aufruf::Rtp(_) | Aufruf::Rtcp(_)))
        .collect();
    assert_eq!(
        pfade,
        vec![
            Aufruf::Rtcp(kanal),
            Aufruf::Rtp(kanal),
            Aufruf::Rtp(kanal),
            Aufruf::Rtp(kanal),
        ]
    );
    assert_eq!(mixer.stats().rtcp_zugestellt, 1);
    assert_eq!(mixer.stats().rtp_zugestellt, 3);
}

#[test]
fn abgelehntes_rtp_liefert_null() {
    let engine = MockEngine::neu(8);
    let mixer = mixer(&engine);
    let quelle = Quelle::neu();
    mixer.add_source(&quelle).unwrap();

    engine.rtp_ablehnen.store(true, Ordering::SeqCst);
    assert_eq!(mixer.deliver_audio_data(&rtp(0), &quelle.0), 0);
    assert_eq!(mixer.stats().pakete_abgelehnt, 1);
}

#[test]
fn unbekannte_quelle_wird_still_verworfen() {
    let engine = MockEngine::neu(8);
    let mixer = mixer(&engine);
    assert_eq!(mixer.deliver_audio_data(&rtp(0), &SourceId::new()), 0);
    assert!(!engine
        .aufrufe()
        .iter()
        .any(|a| matches!(a, Aufruf::Rtp(_) | Aufruf::Rtcp(_))));
}

#[test]
fn fehler_beim_playout_start_wird_zurueckgenommen() {
    let engine = MockEngine::neu(8);
    let mixer = mixer(&engine);
    engine.scheitern_bei(EngineStep::StartPlayout);

    let ergebnis = mixer.add_source(&Quelle::neu());
    assert!(matches!(
        ergebnis,
        Err(MixerError::Engine {
            schritt: EngineStep::StartPlayout,
            ..
        })
    ));

    let aufrufe = engine.aufrufe();
    let angelegt = aufrufe
        .iter()
        .rev()
        .find_map(|a| match a {
            Aufruf::Create(k) => Some(*k),
            _ => None,
        })
        .unwrap();
    assert!(aufrufe.contains(&Aufruf::StopReceive(angelegt)));
    assert!(aufrufe.contains(&Aufruf::Deregister(angelegt)));
    assert!(aufrufe.contains(&Aufruf::Delete(angelegt)));
    assert!(!aufrufe.contains(&Aufruf::StopPlayout(angelegt)));

    assert_eq!(engine.lebende_kanaele(), 1);
    assert_eq!(mixer.quellen_anzahl(), 0);
    assert!(!mixer.is_sending());
}

#[test]
fn fehler_bei_transport_registrierung_loescht_kanal() {
    let engine = MockEngine::neu(8);
    let mixer = mixer(&engine);
    engine.scheitern_bei(EngineStep::RegisterTransport);

    assert!(matches!(
        mixer.add_source(&Quelle::neu()),
        Err(MixerError::Engine {
            schritt: EngineStep::RegisterTransport,
            ..
        })
    ));
    assert_eq!(engine.lebende_kanaele(), 1);
}

#[test]
fn fehler_beim_empfangsstart_wird_zurueckgenommen() {
    let engine = MockEngine::neu(8);
    let mixer = mixer(&engine);
    engine.scheitern_bei(EngineStep::StartReceive);

    assert!(matches!(
        mixer.add_source(&Quelle::neu()),
        Err(MixerError::Engine {
            schritt: EngineStep::StartReceive,
            ..
        })
    ));

    let kanal = engine.zuletzt_angelegt();
    assert_eq!(
        engine.aufrufe_fuer(kanal),
        vec![
            Aufruf::Create(kanal),
            Aufruf::Register(kanal),
            Aufruf::Deregister(kanal),
            Aufruf::Delete(kanal),
        ]
    );
    assert_eq!(engine.lebende_kanaele(), 1, "nur der Ausgangskanal lebt");
    assert_eq!(mixer.quellen_anzahl(), 0);
    assert!(!mixer.is_sending());
}

#[test]
fn fehler_beim_sendestart_nimmt_quelle_nicht_auf() {
    let engine = MockEngine::neu(8);
    let mixer = mixer(&engine);
    let ausgang = mixer.ausgangskanal();
    engine.scheitern_bei(EngineStep::StartSend);

    let quelle = Quelle::neu();
    assert!(matches!(
        mixer.add_source(&quelle),
        Err(MixerError::Engine {
            schritt: EngineStep::StartSend,
            ..
        })
    ));

    let kanal = engine.zuletzt_angelegt();
    assert_eq!(
        engine.aufrufe_fuer(kanal),
        vec![
            Aufruf::Create(kanal),
            Aufruf::Register(kanal),
            Aufruf::StartReceive(kanal),
            Aufruf::StartPlayout(kanal),
            Aufruf::StopPlayout(kanal),
            Aufruf::StopReceive(kanal),
            Aufruf::Deregister(kanal),
            Aufruf::Delete(kanal),
        ]
    );
    assert_eq!(engine.lebende_kanaele(), 1, "nur der Ausgangskanal lebt");
    assert_eq!(mixer.quellen_anzahl(), 0);
    assert_eq!(mixer.kanal_von(&quelle.0), None);
    assert!(!mixer.is_sending());
    assert!(engine.sende_wechsel(ausgang).is_empty());

    // Sobald die Engine wieder mitspielt, startet die naechste Quelle das Senden
    engine.nicht_mehr_scheitern();
    mixer.add_source(&quelle).unwrap();
    assert_eq!(mixer.quellen_anzahl(), 1);
    assert!(mixer.is_sending());
    assert_eq!(engine.sende_wechsel(ausgang), vec![true]);
}

#[test]
fn erschoepfte_engine_liefert_fehler() {
    let engine = MockEngine::neu(3);
    let mixer = mixer(&engine);
    mixer.add_source(&Quelle::neu()).unwrap();
    mixer.add_source(&Quelle::neu()).unwrap();

    assert!(matches!(
        mixer.add_source(&Quelle::neu()),
        Err(MixerError::KanaeleErschoepft { max: 3 })
    ));
    assert_eq!(mixer.quellen_anzahl(), 2);
}

#[test]
fn drop_baut_alles_vor_terminate_ab() {
    let engine = MockEngine::neu(8);
    let mixer = mixer(&engine);
    let a = mixer.add_source(&Quelle::neu()).unwrap();
    let b = mixer.add_source(&Quelle::neu()).unwrap();
    let ausgang = mixer.ausgangskanal();

    drop(mixer);

    let aufrufe = engine.aufrufe();
    let position = |gesucht: Aufruf| aufrufe.iter().position(|a| *a == gesucht).unwrap();
    let terminate = position(Aufruf::Terminate);
    for kanal in [a, b, ausgang] {
        assert!(position(Aufruf::Delete(kanal)) < terminate);
    }
    assert!(position(Aufruf::Delete(ausgang)) < position(Aufruf::Delete(a)));
    assert_eq!(aufrufe.last(), Some(&Aufruf::Terminate));
    assert_eq!(engine.lebende_kanaele(), 0);
}

#[test]
fn nach_drop_kein_tick_mehr() {
    let engine = MockEngine::neu(8);
    let (tx, rx) = crossbeam_channel::unbounded();
    let mixer = AudioMixer::with_events(
        Arc::new(Netz),
        engine.clone(),
        Arc::new(ConfigStore::new(MixerConfig::default())),
        Some(tx),
    )
    .unwrap();

    std::thread::sleep(Duration::from_millis(50));
    assert!(engine.pulls.load(Ordering::SeqCst) > 0);

    drop(mixer);
    let nach_drop = engine.pulls.load(Ordering::SeqCst);
    assert_eq!(nach_drop, engine.frames.load(Ordering::SeqCst));
    std::thread::sleep(Duration::from_millis(40));
    assert_eq!(engine.pulls.load(Ordering::SeqCst), nach_drop);

    let ereignisse: Vec<_> = rx.try_iter().collect();
    assert_eq!(
        ereignisse
            .iter()
            .filter(|e| **e == MixerEvent::MixLoopStopped)
            .count(),
        1
    );
}

#[test]
fn ende_zu_ende_ablauf() {
    let engine = MockEngine::neu(8);
    let (tx, rx) = crossbeam_channel::unbounded();
    let mixer = AudioMixer::with_events(
        Arc::new(Netz),
        engine.clone(),
        Arc::new(ConfigStore::new(MixerConfig::default())),
        Some(tx),
    )
    .unwrap();
    let (a, b) = (Quelle::neu(), Quelle::neu());

    let kanal_a = mixer.add_source(&a).unwrap();
    assert!(mixer.is_sending());
    let kanal_b = mixer.add_source(&b).unwrap();
    assert_ne!(kanal_a, kanal_b);
    assert!(mixer.is_sending());

    let paket = rtp(0);
    assert_eq!(mixer.deliver_audio_data(&paket, &a.0), paket.len());

    mixer.remove_source(&a.0).unwrap();
    assert!(mixer.is_sending());
    mixer.remove_source(&b.0).unwrap();
    assert!(!mixer.is_sending());

    drop(mixer);

    let ereignisse: Vec<_> = rx.try_iter().collect();
    let lebenszyklus: Vec<_> = ereignisse
        .into_iter()
        .filter(|e| *e != MixerEvent::MixLoopStopped)
        .collect();
    assert_eq!(
        lebenszyklus,
        vec![
            MixerEvent::SourceAdded {
                source: a.0,
                channel: kanal_a
            },
            MixerEvent::SendingStarted,
            MixerEvent::SourceAdded {
                source: b.0,
                channel: kanal_b
            },
            MixerEvent::SourceRemoved {
                source: a.0,
                channel: kanal_a
            },
            MixerEvent::SourceRemoved {
                source: b.0,
                channel: kanal_b
            },
            MixerEvent::SendingStopped,
        ]
    );
}
