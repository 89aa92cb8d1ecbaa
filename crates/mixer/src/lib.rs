//! mischpult-mixer – Audio-Mixing-Kern
//!
//! Nimmt RTP-Audio mehrerer Quellen entgegen, laesst die Voice-Engine
//! dekodieren und mischen und schickt das Ergebnis als einen ausgehenden
//! RTP-Kanal an alle Teilnehmer.
//!
//! ## Module
//! - [`mixer`] – `AudioMixer`: Kanal-Lebenszyklus und Paket-Dispatch
//! - [`scheduler`] – Periodischer Mix-Thread (10 ms) mit sauberem Abbruch
//! - [`registry`] – Quelle -> Kanal Zuordnung unter Reader/Writer-Lock
//! - [`engine`] – `VoiceEngine`-Schnittstelle und Software-Engine
//! - [`transport`] – Transport-Adapter zwischen Engine und Netzwerk
//! - [`stats`] – Zaehler fuer Telemetrie
//! - [`config`] – Mixer-Konfiguration

pub mod config;
pub mod engine;
pub mod error;
pub mod mixer;
pub mod registry;
pub mod scheduler;
pub mod stats;
pub mod transport;

pub use config::MixerConfig;
pub use engine::{AudioFrame, SoftEngine, SoftEngineConfig, VoiceEngine};
pub use error::{EngineError, EngineResult, EngineStep, MixerError, MixerResult};
pub use mixer::{AudioMixer, MixLoop};
pub use registry::VoiceChannel;
pub use scheduler::{LoopState, LoopStateHandle, MixScheduler, MixTimer, TickStatus};
pub use stats::MixerStatsSnapshot;
pub use transport::{
    FeedbackSink, MediaSink, MediaSource, MediaTransport, RelayTransport, RtpDataReceiver,
};
