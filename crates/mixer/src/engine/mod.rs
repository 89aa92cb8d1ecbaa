//! Voice-Engine – Schnittstelle zur dekodierenden und mischenden Engine
//!
//! Der Mixer steuert die Engine ausschliesslich ueber [`VoiceEngine`]:
//! Kanaele anlegen/loeschen, Senden/Empfangen/Playout starten und stoppen,
//! externe Transporte registrieren, Pakete einspeisen und im Pull-Betrieb
//! gemischte Frames abholen.
//!
//! [`SoftEngine`] ist die mitgelieferte Software-Implementierung
//! (G.711 µ-law und L16).

pub mod pcm;
pub mod soft;

pub use soft::{SoftEngine, SoftEngineConfig};

use crate::error::EngineResult;
use crate::transport::MediaTransport;
use mischpult_core::ChannelHandle;
use mischpult_protocol::SendCodec;
use std::sync::Arc;

/// Ein Block PCM-Samples (interleaved bei mehreren Kanaelen)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u8,
}

impl AudioFrame {
    /// Stille der gegebenen Laenge
    pub fn stille(samples_per_channel: usize, channels: u8, sample_rate: u32) -> Self {
        Self {
            samples: vec![0; samples_per_channel * channels as usize],
            sample_rate,
            channels,
        }
    }

    /// Samples pro Kanal
    pub fn samples_per_channel(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }
}

/// Schnittstelle der Voice-Engine
///
/// Alle Methoden nehmen `&self`: die Engine wird gleichzeitig vom Mix-Thread
/// und von Aufrufer-Threads benutzt und synchronisiert intern.
pub trait VoiceEngine: Send + Sync {
    fn init(&self) -> EngineResult<()>;
    fn terminate(&self) -> EngineResult<()>;

    /// Aufnahme kommt von aussen (`on_data`) statt vom Geraet
    fn set_external_recording(&self, aktiv: bool) -> EngineResult<()>;
    /// Playout wird von aussen abgeholt (`need_more_play_data`) statt vom Geraet
    fn set_external_playout(&self, aktiv: bool) -> EngineResult<()>;

    fn create_channel(&self) -> EngineResult<ChannelHandle>;
    fn delete_channel(&self, kanal: ChannelHandle) -> EngineResult<()>;

    fn start_send(&self, kanal: ChannelHandle) -> EngineResult<()>;
    fn stop_send(&self, kanal: ChannelHandle) -> EngineResult<()>;
    fn start_receive(&self, kanal: ChannelHandle) -> EngineResult<()>;
    fn stop_receive(&self, kanal: ChannelHandle) -> EngineResult<()>;
    fn start_playout(&self, kanal: ChannelHandle) -> EngineResult<()>;
    fn stop_playout(&self, kanal: ChannelHandle) -> EngineResult<()>;

    fn register_external_transport(
        &self,
        kanal: ChannelHandle,
        transport: Arc<dyn MediaTransport>,
    ) -> EngineResult<()>;
    fn deregister_external_transport(&self, kanal: ChannelHandle) -> EngineResult<()>;

    /// Eingehendes RTP. Ein Fehler bedeutet: Paket abgelehnt.
    fn received_rtp_packet(&self, kanal: ChannelHandle, paket: &[u8]) -> EngineResult<()>;
    /// Eingehendes RTCP
    fn received_rtcp_packet(&self, kanal: ChannelHandle, paket: &[u8]) -> EngineResult<()>;

    fn send_codec(&self, kanal: ChannelHandle) -> EngineResult<SendCodec>;
    fn set_send_codec(&self, kanal: ChannelHandle, codec: &SendCodec) -> EngineResult<()>;

    /// Mischt alle spielenden Kanaele zu einem Frame
    fn need_more_play_data(
        &self,
        samples_per_channel: usize,
        channels: u8,
        sample_rate: u32,
    ) -> EngineResult<AudioFrame>;

    /// Uebergibt einen aufgenommenen Frame zum Kodieren und Senden auf `kanal`
    fn on_data(&self, kanal: ChannelHandle, frame: &AudioFrame) -> EngineResult<()>;
}
