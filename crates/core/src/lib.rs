//! mischpult-core – Gemeinsame Typen, Fehlertypen und Konfiguration
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die vom Mixer,
//! vom Protokoll-Crate und vom Relay-Server gemeinsam genutzt werden.

pub mod config;
pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use config::{ConfigStore, ListenerId};
pub use error::{MischpultError, Result};
pub use event::MixerEvent;
pub use types::{ChannelHandle, SourceId};
