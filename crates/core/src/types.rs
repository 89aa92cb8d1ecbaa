//! Gemeinsame Identifikationstypen fuer Mischpult
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! Quell-Identitaeten und Engine-Kanal-Handles zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identitaet einer Media-Quelle
///
/// Wird vom Mixer ausschliesslich als Map-Schluessel verwendet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(pub Uuid);

impl SourceId {
    /// Erstellt eine neue zufaellige SourceId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "source:{}", self.0)
    }
}

/// Handle eines Kanals der Voice-Engine
///
/// Nicht-negativ per Konstruktion. Die Engine vergibt Handles, der Mixer
/// reicht sie nur weiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelHandle(pub u32);

impl ChannelHandle {
    /// Gibt den Slot-Index zurueck
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch:{}", self.0)
    }
}
