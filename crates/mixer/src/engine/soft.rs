//! Software-Voice-Engine
//!
//! Dekodiert eingehendes G.711-µ-law- und L16-RTP pro Kanal in einen
//! begrenzten Playout-Puffer, mischt bei `need_more_play_data` alle
//! spielenden Kanaele saettigend zusammen und kodiert per `on_data`
//! uebergebene Frames wieder zu RTP fuer den externen Transport.
//!
//! Alle Zustaende liegen hinter einem einzigen Mutex. Transport-Aufrufe
//! passieren immer nach dem Freigeben des Locks.

use super::pcm;
use super::{AudioFrame, VoiceEngine};
use crate::error::{EngineError, EngineResult};
use crate::transport::MediaTransport;
use mischpult_core::ChannelHandle;
use mischpult_protocol::rtp::{RTCP_RECEIVER_PT, RTCP_SENDER_PT, RTP_VERSION};
use mischpult_protocol::{ChannelCount, PayloadFormat, RtpHeader, RtpPacket, SampleRate, SendCodec};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Basis fuer die SSRC ausgehender Kanaele ("MP" + Kanalnummer)
const SSRC_BASIS: u32 = 0x4D50_0000;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration der Software-Engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftEngineConfig {
    /// Maximale Anzahl gleichzeitiger Kanaele (inklusive Ausgangskanal)
    pub max_kanaele: usize,
    /// Obergrenze des Playout-Puffers pro Kanal in Millisekunden
    pub playout_puffer_ms: u32,
    /// Akzeptierte Empfangs-Codecs (Zuordnung per Payload-Typ)
    pub empfangs_codecs: Vec<SendCodec>,
}

impl Default for SoftEngineConfig {
    fn default() -> Self {
        Self {
            max_kanaele: 64,
            playout_puffer_ms: 200,
            empfangs_codecs: vec![
                SendCodec::pcmu(),
                SendCodec::l16(96, SampleRate::Hz16000, ChannelCount::Mono),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Kanal-Zustand
// ---------------------------------------------------------------------------

struct Slot {
    sendet: bool,
    empfaengt: bool,
    spielt: bool,
    transport: Option<Arc<dyn MediaTransport>>,
    send_codec: SendCodec,
    /// Mono-Samples mit `playout_rate`
    playout: VecDeque<i16>,
    playout_rate: u32,
    sequenz: u16,
    zeitstempel: u32,
    ssrc: u32,
    /// Marker-Bit fuer das erste Paket nach `start_send`
    marker: bool,
    rtcp_empfangen: u64,
}

impl Slot {
    fn neu(kanal: ChannelHandle) -> Self {
        Self {
            sendet: false,
            empfaengt: false,
            spielt: false,
            transport: None,
            send_codec: SendCodec::default(),
            playout: VecDeque::new(),
            playout_rate: SampleRate::Hz8000.hz(),
            sequenz: 0,
            zeitstempel: 0,
            ssrc: SSRC_BASIS | kanal.0,
            marker: false,
            rtcp_empfangen: 0,
        }
    }

    /// Haengt dekodierte Samples an; bei Ratenwechsel wird der Puffer verworfen
    fn puffern(&mut self, samples: Vec<i16>, rate: u32, puffer_ms: u32) {
        if rate != self.playout_rate {
            self.playout.clear();
            self.playout_rate = rate;
        }
        self.playout.extend(samples);

        let max = (rate as usize * puffer_ms as usize / 1000).max(1);
        if self.playout.len() > max {
            let zuviel = self.playout.len() - max;
            self.playout.drain(..zuviel);
        }
    }

    /// Entnimmt `n` Samples bei `ziel_rate` (fehlende Samples sind Stille)
    fn entnehmen(&mut self, n: usize, ziel_rate: u32) -> Vec<i16> {
        let quell_n = n * self.playout_rate as usize / ziel_rate.max(1) as usize;
        let verfuegbar = quell_n.min(self.playout.len());
        let mut block: Vec<i16> = self.playout.drain(..verfuegbar).collect();
        block.resize(quell_n, 0);
        pcm::resample_linear(&block, n)
    }
}

struct Inner {
    initialisiert: bool,
    externe_aufnahme: bool,
    externes_playout: bool,
    slots: Vec<Option<Slot>>,
}

impl Inner {
    fn slot(&mut self, kanal: ChannelHandle) -> EngineResult<&mut Slot> {
        if !self.initialisiert {
            return Err(EngineError::NichtInitialisiert);
        }
        self.slots
            .get_mut(kanal.index())
            .and_then(Option::as_mut)
            .ok_or(EngineError::UnbekannterKanal(kanal))
    }

    fn aktive_kanaele(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

// ---------------------------------------------------------------------------
// SoftEngine
// ---------------------------------------------------------------------------

/// Voice-Engine in reiner Software
pub struct SoftEngine {
    config: SoftEngineConfig,
    inner: Mutex<Inner>,
}

impl SoftEngine {
    pub fn neu(config: SoftEngineConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                initialisiert: false,
                externe_aufnahme: false,
                externes_playout: false,
                slots: Vec::new(),
            }),
        }
    }

    /// Anzahl belegter Kanaele
    pub fn kanal_anzahl(&self) -> usize {
        self.inner.lock().aktive_kanaele()
    }

    /// Gepufferte Playout-Samples eines Kanals
    pub fn gepuffert(&self, kanal: ChannelHandle) -> EngineResult<usize> {
        Ok(self.inner.lock().slot(kanal)?.playout.len())
    }

    /// Anzahl empfangener RTCP-Pakete eines Kanals
    pub fn rtcp_empfangen(&self, kanal: ChannelHandle) -> EngineResult<u64> {
        Ok(self.inner.lock().slot(kanal)?.rtcp_empfangen)
    }

    fn empfangs_codec(&self, payload_type: u8) -> EngineResult<&SendCodec> {
        self.config
            .empfangs_codecs
            .iter()
            .find(|c| c.payload_type == payload_type)
            .ok_or_else(|| {
                EngineError::NichtUnterstuetzt(format!("Payload-Typ {}", payload_type))
            })
    }

    fn mit_slot<R>(
        &self,
        kanal: ChannelHandle,
        f: impl FnOnce(&mut Slot) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let mut inner = self.inner.lock();
        f(inner.slot(kanal)?)
    }
}

impl Default for SoftEngine {
    fn default() -> Self {
        Self::neu(SoftEngineConfig::default())
    }
}

/// Dekodiert RTP-Nutzdaten in Mono-Samples
fn dekodieren(codec: &SendCodec, nutzdaten: &[u8]) -> Vec<i16> {
    match codec.format {
        PayloadFormat::Pcmu => nutzdaten.iter().map(|&b| pcm::ulaw_decode(b)).collect(),
        PayloadFormat::L16 => pcm::downmix(&pcm::l16_decode(nutzdaten), codec.channels.anzahl()),
    }
}

/// Bringt einen Frame auf Rate und Kanalzahl des Codecs und kodiert ihn
fn kodieren(codec: &SendCodec, frame: &AudioFrame) -> (Vec<u8>, usize) {
    let mono = pcm::downmix(&frame.samples, frame.channels);
    let ziel_n = mono.len() * codec.plfreq() as usize / frame.sample_rate.max(1) as usize;
    let mono = pcm::resample_linear(&mono, ziel_n);
    let samples = pcm::upmix(&mono, codec.channels.anzahl());

    let nutzdaten = match codec.format {
        PayloadFormat::Pcmu => samples.iter().map(|&s| pcm::ulaw_encode(s)).collect(),
        PayloadFormat::L16 => pcm::l16_encode(&samples),
    };
    (nutzdaten, ziel_n)
}

/// Minimaler Receiver Report ohne Report-Bloecke
fn receiver_report(ssrc: u32) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf[0] = RTP_VERSION << 6;
    buf[1] = RTCP_RECEIVER_PT;
    buf[2..4].copy_from_slice(&1u16.to_be_bytes());
    buf[4..8].copy_from_slice(&ssrc.to_be_bytes());
    buf
}

impl VoiceEngine for SoftEngine {
    fn init(&self) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        if !inner.initialisiert {
            inner.initialisiert = true;
            tracing::debug!(max_kanaele = self.config.max_kanaele, "SoftEngine initialisiert");
        }
        Ok(())
    }

    fn terminate(&self) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        if !inner.initialisiert {
            return Err(EngineError::NichtInitialisiert);
        }
        let aktiv = inner.aktive_kanaele();
        if aktiv > 0 {
            return Err(EngineError::KanaeleAktiv(aktiv));
        }
        inner.initialisiert = false;
        inner.slots.clear();
        tracing::debug!("SoftEngine beendet");
        Ok(())
    }

    fn set_external_recording(&self, aktiv: bool) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        if !inner.initialisiert {
            return Err(EngineError::NichtInitialisiert);
        }
        inner.externe_aufnahme = aktiv;
        Ok(())
    }

    fn set_external_playout(&self, aktiv: bool) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        if !inner.initialisiert {
            return Err(EngineError::NichtInitialisiert);
        }
        inner.externes_playout = aktiv;
        Ok(())
    }

    fn create_channel(&self) -> EngineResult<ChannelHandle> {
        let mut inner = self.inner.lock();
        if !inner.initialisiert {
            return Err(EngineError::NichtInitialisiert);
        }

        let index = match inner.slots.iter().position(Option::is_none) {
            Some(frei) => frei,
            None if inner.slots.len() < self.config.max_kanaele => {
                inner.slots.push(None);
                inner.slots.len() - 1
            }
            None => {
                return Err(EngineError::KanaeleErschoepft {
                    max: self.config.max_kanaele,
                })
            }
        };

        let kanal = ChannelHandle(index as u32);
        inner.slots[index] = Some(Slot::neu(kanal));
        tracing::trace!(kanal = %kanal, "Kanal angelegt");
        Ok(kanal)
    }

    fn delete_channel(&self, kanal: ChannelHandle) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        inner.slot(kanal)?;
        inner.slots[kanal.index()] = None;
        tracing::trace!(kanal = %kanal, "Kanal geloescht");
        Ok(())
    }

    fn start_send(&self, kanal: ChannelHandle) -> EngineResult<()> {
        self.mit_slot(kanal, |slot| {
            if slot.transport.is_none() {
                return Err(EngineError::KeinTransport(kanal));
            }
            if !slot.sendet {
                slot.sendet = true;
                slot.marker = true;
            }
            Ok(())
        })
    }

    fn stop_send(&self, kanal: ChannelHandle) -> EngineResult<()> {
        self.mit_slot(kanal, |slot| {
            slot.sendet = false;
            Ok(())
        })
    }

    fn start_receive(&self, kanal: ChannelHandle) -> EngineResult<()> {
        self.mit_slot(kanal, |slot| {
            slot.empfaengt = true;
            Ok(())
        })
    }

    fn stop_receive(&self, kanal: ChannelHandle) -> EngineResult<()> {
        self.mit_slot(kanal, |slot| {
            slot.empfaengt = false;
            slot.playout.clear();
            Ok(())
        })
    }

    fn start_playout(&self, kanal: ChannelHandle) -> EngineResult<()> {
        self.mit_slot(kanal, |slot| {
            slot.spielt = true;
            Ok(())
        })
    }

    fn stop_playout(&self, kanal: ChannelHandle) -> EngineResult<()> {
        self.mit_slot(kanal, |slot| {
            slot.spielt = false;
            slot.playout.clear();
            Ok(())
        })
    }

    fn register_external_transport(
        &self,
        kanal: ChannelHandle,
        transport: Arc<dyn MediaTransport>,
    ) -> EngineResult<()> {
        self.mit_slot(kanal, |slot| {
            if slot.transport.is_some() {
                return Err(EngineError::TransportBereitsRegistriert(kanal));
            }
            slot.transport = Some(transport);
            Ok(())
        })
    }

    fn deregister_external_transport(&self, kanal: ChannelHandle) -> EngineResult<()> {
        self.mit_slot(kanal, |slot| {
            slot.sendet = false;
            slot.transport
                .take()
                .map(|_| ())
                .ok_or(EngineError::KeinTransport(kanal))
        })
    }

    fn received_rtp_packet(&self, kanal: ChannelHandle, paket: &[u8]) -> EngineResult<()> {
        let rtp =
            RtpPacket::decode(paket).map_err(|e| EngineError::UngueltigesPaket(e.to_string()))?;
        let codec = self.empfangs_codec(rtp.header.payload_type)?;
        let samples = dekodieren(codec, &rtp.payload);
        let rate = codec.plfreq();
        let puffer_ms = self.config.playout_puffer_ms;

        self.mit_slot(kanal, |slot| {
            if !slot.empfaengt {
                return Err(EngineError::EmpfangInaktiv(kanal));
            }
            if slot.spielt {
                slot.puffern(samples, rate, puffer_ms);
            }
            Ok(())
        })
    }

    fn received_rtcp_packet(&self, kanal: ChannelHandle, paket: &[u8]) -> EngineResult<()> {
        if paket.len() < 8 || paket[0] >> 6 != RTP_VERSION {
            return Err(EngineError::UngueltigesPaket(format!(
                "RTCP-Paket ungueltig ({} Bytes)",
                paket.len()
            )));
        }

        // Sender Reports werden mit einem Receiver Report beantwortet
        let antwort = self.mit_slot(kanal, |slot| {
            if !slot.empfaengt {
                return Err(EngineError::EmpfangInaktiv(kanal));
            }
            slot.rtcp_empfangen += 1;
            Ok(match (&slot.transport, paket[1]) {
                (Some(transport), RTCP_SENDER_PT) => {
                    Some((transport.clone(), receiver_report(slot.ssrc)))
                }
                _ => None,
            })
        })?;

        if let Some((transport, rr)) = antwort {
            if !transport.send_rtcp(&rr) {
                tracing::trace!(kanal = %kanal, "Receiver Report nicht zugestellt");
            }
        }
        Ok(())
    }

    fn send_codec(&self, kanal: ChannelHandle) -> EngineResult<SendCodec> {
        self.mit_slot(kanal, |slot| Ok(slot.send_codec.clone()))
    }

    fn set_send_codec(&self, kanal: ChannelHandle, codec: &SendCodec) -> EngineResult<()> {
        codec.validieren().map_err(EngineError::NichtUnterstuetzt)?;
        self.mit_slot(kanal, |slot| {
            slot.send_codec = codec.clone();
            Ok(())
        })
    }

    fn need_more_play_data(
        &self,
        samples_per_channel: usize,
        channels: u8,
        sample_rate: u32,
    ) -> EngineResult<AudioFrame> {
        let mut inner = self.inner.lock();
        if !inner.initialisiert {
            return Err(EngineError::NichtInitialisiert);
        }
        if !inner.externes_playout {
            return Err(EngineError::ExternesAudioInaktiv);
        }

        let mut summe = vec![0i16; samples_per_channel];
        for slot in inner.slots.iter_mut().flatten().filter(|s| s.spielt) {
            let block = slot.entnehmen(samples_per_channel, sample_rate);
            pcm::mix_into(&mut summe, &block);
        }

        Ok(AudioFrame {
            samples: pcm::upmix(&summe, channels),
            sample_rate,
            channels,
        })
    }

    fn on_data(&self, kanal: ChannelHandle, frame: &AudioFrame) -> EngineResult<()> {
        let (transport, paket) = {
            let mut inner = self.inner.lock();
            if !inner.externe_aufnahme {
                return Err(EngineError::ExternesAudioInaktiv);
            }
            let slot = inner.slot(kanal)?;
            if !slot.sendet {
                return Ok(());
            }
            let transport = slot
                .transport
                .clone()
                .ok_or(EngineError::KeinTransport(kanal))?;

            let (nutzdaten, samples) = kodieren(&slot.send_codec, frame);
            let header = RtpHeader {
                marker: std::mem::take(&mut slot.marker),
                payload_type: slot.send_codec.payload_type,
                sequence: slot.sequenz,
                timestamp: slot.zeitstempel,
                ssrc: slot.ssrc,
            };
            slot.sequenz = slot.sequenz.wrapping_add(1);
            slot.zeitstempel = slot.zeitstempel.wrapping_add(samples as u32);
            (transport, RtpPacket::new(header, nutzdaten).encode())
        };

        if !transport.send_rtp(&paket) {
            tracing::trace!(kanal = %kanal, "RTP-Paket nicht zugestellt");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
