//! Sende-Codec-Beschreibung
//!
//! Die Codec-Interna selbst liegen in der Voice-Engine. Hier steht nur,
//! was der Mixer ueber den ausgehandelten Sende-Codec wissen muss: Abtastrate
//! und Kanalzahl (fuer die Groesse eines Pull-Frames) sowie Payload-Typ und
//! Format (fuer die Software-Engine).

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Basistypen
// ---------------------------------------------------------------------------

/// Abtastrate
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleRate {
    /// 8 kHz – Schmalband (Telefon-Qualitaet, G.711)
    #[default]
    Hz8000 = 8000,
    /// 16 kHz – Breitband (gute Sprach-Qualitaet)
    Hz16000 = 16000,
    /// 24 kHz – Superbreitband
    Hz24000 = 24000,
    /// 32 kHz
    Hz32000 = 32000,
    /// 48 kHz – Vollband
    Hz48000 = 48000,
}

impl SampleRate {
    /// Abtastrate in Hz
    pub fn hz(&self) -> u32 {
        *self as u32
    }
}

/// Anzahl der Audio-Kanaele
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelCount {
    /// Mono (1 Kanal) – fuer Sprache empfohlen
    #[default]
    Mono = 1,
    /// Stereo (2 Kanaele)
    Stereo = 2,
}

impl ChannelCount {
    /// Anzahl als Zahl
    pub fn anzahl(&self) -> u8 {
        *self as u8
    }
}

/// Nutzdaten-Format eines RTP-Streams
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    /// G.711 µ-law, 8 Bit pro Sample
    #[default]
    Pcmu,
    /// Lineares PCM, 16 Bit big-endian
    L16,
}

impl PayloadFormat {
    /// Codec-Name wie im SDP
    pub fn name(&self) -> &'static str {
        match self {
            PayloadFormat::Pcmu => "PCMU",
            PayloadFormat::L16 => "L16",
        }
    }

    /// Bytes pro Sample und Kanal
    pub fn bytes_pro_sample(&self) -> usize {
        match self {
            PayloadFormat::Pcmu => 1,
            PayloadFormat::L16 => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// SendCodec
// ---------------------------------------------------------------------------

/// Aktuell ausgehandelter Sende-Codec eines Kanals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendCodec {
    /// RTP-Payload-Typ
    pub payload_type: u8,
    /// Nutzdaten-Format
    pub format: PayloadFormat,
    /// Abtastrate
    pub sample_rate: SampleRate,
    /// Anzahl der Kanaele
    pub channels: ChannelCount,
}

impl SendCodec {
    /// G.711 µ-law, statischer Payload-Typ 0
    pub fn pcmu() -> Self {
        Self {
            payload_type: 0,
            format: PayloadFormat::Pcmu,
            sample_rate: SampleRate::Hz8000,
            channels: ChannelCount::Mono,
        }
    }

    /// L16 mit dynamischem Payload-Typ
    pub fn l16(payload_type: u8, sample_rate: SampleRate, channels: ChannelCount) -> Self {
        Self {
            payload_type,
            format: PayloadFormat::L16,
            sample_rate,
            channels,
        }
    }

    /// Abtastrate in Hz
    pub fn plfreq(&self) -> u32 {
        self.sample_rate.hz()
    }

    /// Samples pro Kanal in einem Intervall (`plfreq / 1000 * ms`)
    pub fn samples_per_channel(&self, intervall: Duration) -> usize {
        (self.plfreq() / 1000) as usize * intervall.as_millis() as usize
    }

    /// Bitrate in Bits pro Sekunde
    pub fn bitrate_bps(&self) -> u32 {
        self.plfreq() * self.channels.anzahl() as u32 * self.format.bytes_pro_sample() as u32 * 8
    }

    /// Validiert die Konfiguration
    pub fn validieren(&self) -> Result<(), String> {
        if self.payload_type > 127 {
            return Err(format!(
                "Payload-Typ muss zwischen 0 und 127 liegen (war: {})",
                self.payload_type
            ));
        }
        if (72..=78).contains(&self.payload_type) {
            return Err(format!(
                "Payload-Typ {} kollidiert mit RTCP-Pakettypen",
                self.payload_type
            ));
        }
        if self.format == PayloadFormat::Pcmu
            && (self.sample_rate != SampleRate::Hz8000 || self.channels != ChannelCount::Mono)
        {
            return Err("PCMU erfordert 8 kHz Mono".into());
        }
        Ok(())
    }
}

impl Default for SendCodec {
    fn default() -> Self {
        Self::pcmu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
