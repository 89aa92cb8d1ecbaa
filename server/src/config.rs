//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use mischpult_mixer::{MixerConfig, SoftEngineConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Mix-Intervall und Sende-Codec
    pub mixer: MixerConfig,
    /// Software-Engine (Kanalzahl, Playout-Puffer, Empfangs-Codecs)
    pub engine: SoftEngineConfig,
    /// Verwaltung der UDP-Gegenstellen
    pub peers: PeerEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer UDP und Observability
    pub bind_adresse: String,
    /// Port fuer RTP/RTCP
    pub udp_port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            udp_port: 5004,
        }
    }
}

/// Verwaltung der UDP-Gegenstellen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerEinstellungen {
    /// Gegenstellen ohne Paket seit so vielen Sekunden werden entfernt
    pub idle_timeout_secs: u64,
    /// Laenge der Sende-Queue pro Gegenstelle
    pub send_queue_groesse: usize,
    /// Intervall der Inaktivitaets-Pruefung in Sekunden
    pub bereinigung_intervall_secs: u64,
}

impl Default for PeerEinstellungen {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30,
            send_queue_groesse: 64,
            bereinigung_intervall_secs: 5,
        }
    }
}

impl PeerEinstellungen {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn bereinigung_intervall(&self) -> Duration {
        Duration::from_secs(self.bereinigung_intervall_secs.max(1))
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
    /// Abstand zwischen zwei Metrik-Abgleichen in Millisekunden
    pub abgleich_intervall_ms: u64,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9300,
            abgleich_intervall_ms: 1000,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        let config: Self = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => toml::from_str(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
                ))
            }
        };
        config.validieren()?;
        Ok(config)
    }

    /// Prueft die Werte, die serde allein nicht abfangen kann
    pub fn validieren(&self) -> anyhow::Result<()> {
        self.mixer.validieren()?;
        if self.engine.max_kanaele < 2 {
            anyhow::bail!("engine.max_kanaele muss mindestens 2 sein (Ausgang + eine Quelle)");
        }
        if self.peers.send_queue_groesse == 0 {
            anyhow::bail!("peers.send_queue_groesse darf nicht 0 sein");
        }
        Ok(())
    }

    /// Gibt die vollstaendige Bind-Adresse fuer UDP zurueck
    pub fn udp_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.udp_port)
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.observability.port)
    }
}
