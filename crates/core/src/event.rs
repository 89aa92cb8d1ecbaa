//! Mixer-Ereignisse
//!
//! Lebenszyklus-Ereignisse des Audio-Mixers. Der Mixer veroeffentlicht sie
//! nicht-blockierend; Abonnenten (Server, Tests) entscheiden selbst, was
//! sie damit tun.

use crate::types::{ChannelHandle, SourceId};
use serde::{Deserialize, Serialize};

/// Alle Ereignisse die der Mixer veroeffentlicht
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MixerEvent {
    /// Eine Quelle wurde registriert und mischt mit
    SourceAdded {
        source: SourceId,
        channel: ChannelHandle,
    },
    /// Eine Quelle wurde entfernt
    SourceRemoved {
        source: SourceId,
        channel: ChannelHandle,
    },
    /// Der Ausgangskanal sendet (erste Quelle hinzugekommen)
    SendingStarted,
    /// Der Ausgangskanal sendet nicht mehr (letzte Quelle entfernt)
    SendingStopped,
    /// Die Mix-Schleife hat ihren letzten Tick ausgefuehrt
    MixLoopStopped,
}
