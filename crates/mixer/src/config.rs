//! Mixer-Konfiguration

use mischpult_core::{MischpultError, Result};
use mischpult_protocol::SendCodec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Laufzeit-Konfiguration des Audio-Mixers
///
/// Wird ueber einen `ConfigStore` geteilt. Aenderungen am Sende-Codec werden
/// sofort an den Ausgangskanal weitergereicht; das Mix-Intervall wird beim
/// naechsten Start des Mixers wirksam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Abstand zwischen zwei Mix-Durchlaeufen in Millisekunden
    pub mix_intervall_ms: u64,
    /// Sende-Codec des gemischten Ausgangsstroms
    pub send_codec: SendCodec,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            mix_intervall_ms: 10,
            send_codec: SendCodec::pcmu(),
        }
    }
}

impl MixerConfig {
    pub fn mix_intervall(&self) -> Duration {
        Duration::from_millis(self.mix_intervall_ms)
    }

    /// Prueft Intervall und Sende-Codec
    pub fn validieren(&self) -> Result<()> {
        if !(1..=100).contains(&self.mix_intervall_ms) {
            return Err(MischpultError::konfiguration(format!(
                "Mix-Intervall muss zwischen 1 und 100 ms liegen (war: {})",
                self.mix_intervall_ms
            )));
        }
        self.send_codec
            .validieren()
            .map_err(|e| MischpultError::konfiguration(format!("Sende-Codec: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mischpult_protocol::{ChannelCount, SampleRate};

    #[test]
    fn standard_ist_gueltig() {
        let cfg = MixerConfig::default();
        assert_eq!(cfg.mix_intervall(), Duration::from_millis(10));
        assert!(cfg.validieren().is_ok());
    }

    #[test]
    fn intervall_null_ungueltig() {
        let cfg = MixerConfig {
            mix_intervall_ms: 0,
            ..Default::default()
        };
        assert!(cfg.validieren().is_err());
    }

    #[test]
    fn ungueltiger_codec_wird_gemeldet() {
        let cfg = MixerConfig {
            send_codec: SendCodec::l16(75, SampleRate::Hz16000, ChannelCount::Mono),
            ..Default::default()
        };
        let fehler = cfg.validieren().unwrap_err().to_string();
        assert!(fehler.contains("Sende-Codec"), "{}", fehler);
    }

    #[test]
    fn fehlende_felder_nehmen_standard() {
        let cfg: MixerConfig = serde_json::from_str(r#"{"mix_intervall_ms": 20}"#).unwrap();
        assert_eq!(cfg.mix_intervall_ms, 20);
        assert_eq!(cfg.send_codec, SendCodec::pcmu());
    }
}
