//! Fehlertypen fuer Mixer und Voice-Engine

use mischpult_core::{ChannelHandle, MischpultError, SourceId};
use thiserror::Error;

/// Fehler der Voice-Engine (pro Aufruf)
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine nicht initialisiert")]
    NichtInitialisiert,

    #[error("Unbekannter Kanal: {0}")]
    UnbekannterKanal(ChannelHandle),

    #[error("Keine freien Kanaele (Maximum {max})")]
    KanaeleErschoepft { max: usize },

    #[error("Kanal {0} hat bereits einen externen Transport")]
    TransportBereitsRegistriert(ChannelHandle),

    #[error("Kanal {0} hat keinen externen Transport")]
    KeinTransport(ChannelHandle),

    #[error("Kanal {0} empfaengt nicht")]
    EmpfangInaktiv(ChannelHandle),

    #[error("Externe Audio-Ein-/Ausgabe nicht aktiviert")]
    ExternesAudioInaktiv,

    #[error("Ungueltiges Paket: {0}")]
    UngueltigesPaket(String),

    #[error("Nicht unterstuetzt: {0}")]
    NichtUnterstuetzt(String),

    #[error("Noch {0} Kanaele aktiv")]
    KanaeleAktiv(usize),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Schritt im Kanal-Lebenszyklus, an dem ein Engine-Aufruf scheiterte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStep {
    Init,
    ExternalMedia,
    CreateChannel,
    RegisterTransport,
    SetSendCodec,
    StartReceive,
    StartPlayout,
    StartSend,
}

impl std::fmt::Display for EngineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineStep::Init => "Init",
            EngineStep::ExternalMedia => "ExternalMedia",
            EngineStep::CreateChannel => "CreateChannel",
            EngineStep::RegisterTransport => "RegisterExternalTransport",
            EngineStep::SetSendCodec => "SetSendCodec",
            EngineStep::StartReceive => "StartReceive",
            EngineStep::StartPlayout => "StartPlayout",
            EngineStep::StartSend => "StartSend",
        };
        f.write_str(name)
    }
}

/// Alle moeglichen Fehler des Audio-Mixers
///
/// Jeder Fehler aus `add_source` bedeutet fuer den Aufrufer dasselbe:
/// die Quelle wird nicht gemischt.
#[derive(Debug, Error)]
pub enum MixerError {
    #[error("Quelle nicht registriert: {0}")]
    QuelleUnbekannt(SourceId),

    #[error("Quelle bereits registriert: {0}")]
    QuelleDoppelt(SourceId),

    #[error("Keine freien Engine-Kanaele (Maximum {max})")]
    KanaeleErschoepft { max: usize },

    #[error("Engine-Fehler bei {schritt}: {quelle}")]
    Engine {
        schritt: EngineStep,
        #[source]
        quelle: EngineError,
    },

    #[error("Mix-Thread konnte nicht gestartet werden: {0}")]
    Thread(#[from] std::io::Error),

    #[error(transparent)]
    Konfiguration(#[from] MischpultError),
}

impl MixerError {
    /// Ordnet einen Engine-Fehler dem gescheiterten Schritt zu
    ///
    /// Erschoepfung beim Anlegen wird als eigener Fehler gemeldet.
    pub fn engine(schritt: EngineStep, quelle: EngineError) -> Self {
        match quelle {
            EngineError::KanaeleErschoepft { max } => Self::KanaeleErschoepft { max },
            quelle => Self::Engine { schritt, quelle },
        }
    }
}

pub type MixerResult<T> = Result<T, MixerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erschoepfung_wird_eigener_fehler() {
        let e = MixerError::engine(
            EngineStep::CreateChannel,
            EngineError::KanaeleErschoepft { max: 4 },
        );
        assert!(matches!(e, MixerError::KanaeleErschoepft { max: 4 }));
    }

    #[test]
    fn engine_fehler_nennt_schritt() {
        let e = MixerError::engine(
            EngineStep::StartPlayout,
            EngineError::UnbekannterKanal(ChannelHandle(3)),
        );
        assert_eq!(
            e.to_string(),
            "Engine-Fehler bei StartPlayout: Unbekannter Kanal: ch:3"
        );
    }
}
