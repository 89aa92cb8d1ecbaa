//! Zuordnung Quelle -> Engine-Kanal
//!
//! Die Registry ist nur eine Tabelle hinter einem Reader/Writer-Lock. Der
//! Mixer haelt den Lesezugriff waehrend des gesamten Paket-Dispatch. Ein
//! neuer Kanal wird vor dem Schreibzugriff vollstaendig aufgebaut; unter
//! dem Schreib-Lock laufen nur Eintragen und das Einschalten des Ausgangs.
//! Beim Entfernen haelt der Mixer den Schreib-Lock waehrend des gesamten
//! Abbaus, sodass ein Dispatch nie auf einen halb abgebauten Kanal trifft.

use crate::transport::MediaTransport;
use mischpult_core::{ChannelHandle, SourceId};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::Arc;

/// Ein Engine-Kanal mit seinem externen Transport
#[derive(Clone)]
pub struct VoiceChannel {
    pub handle: ChannelHandle,
    pub transport: Arc<dyn MediaTransport>,
}

impl VoiceChannel {
    pub fn neu(handle: ChannelHandle, transport: Arc<dyn MediaTransport>) -> Self {
        Self { handle, transport }
    }
}

impl std::fmt::Debug for VoiceChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceChannel")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

pub type Tabelle = HashMap<SourceId, VoiceChannel>;

/// Quelle -> Kanal Tabelle
#[derive(Default)]
pub struct ChannelRegistry {
    kanaele: RwLock<Tabelle>,
}

impl ChannelRegistry {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Geteilter Zugriff (Paket-Dispatch)
    pub fn lesen(&self) -> RwLockReadGuard<'_, Tabelle> {
        self.kanaele.read()
    }

    /// Exklusiver Zugriff (Kanal-Auf- und Abbau)
    pub fn schreiben(&self) -> RwLockWriteGuard<'_, Tabelle> {
        self.kanaele.write()
    }

    pub fn handle_von(&self, quelle: &SourceId) -> Option<ChannelHandle> {
        self.kanaele.read().get(quelle).map(|k| k.handle)
    }

    pub fn enthaelt(&self, quelle: &SourceId) -> bool {
        self.kanaele.read().contains_key(quelle)
    }

    pub fn anzahl(&self) -> usize {
        self.kanaele.read().len()
    }

    /// Alle Kanal-Handles, aufsteigend sortiert
    pub fn handles(&self) -> Vec<ChannelHandle> {
        let mut handles: Vec<_> = self.kanaele.read().values().map(|k| k.handle).collect();
        handles.sort();
        handles
    }
}
