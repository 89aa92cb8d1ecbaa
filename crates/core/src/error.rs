//! Fehlertypen fuer Mischpult
//!
//! Gemeinsamer Fehler-Enum fuer Konfigurationsfehler.
//! Der Mixer definiert eigene Fehler und konvertiert via `#[from]`.

use thiserror::Error;

/// Globaler Result-Alias fuer Mischpult
pub type Result<T> = std::result::Result<T, MischpultError>;

/// Gemeinsame Fehler im Mischpult-System
#[derive(Debug, Error)]
pub enum MischpultError {
    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl MischpultError {
    /// Erstellt einen Konfigurationsfehler aus einer beliebigen Nachricht
    pub fn konfiguration(msg: impl Into<String>) -> Self {
        Self::Konfiguration(msg.into())
    }
}
