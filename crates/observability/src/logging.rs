//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable:
//! - `MISCHPULT_LOG_LEVEL`: Filter (z.B. `info` oder `mischpult_mixer=debug`), Standard: info
//! - `MISCHPULT_LOG_FORMAT`: Format (text/json), Standard: text
//!
//! Umgebungsvariablen haben Vorrang vor den Werten aus der Konfigurationsdatei.

use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_LEVEL_ENV: &str = "MISCHPULT_LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "MISCHPULT_LOG_FORMAT";

/// Initialisiert das Logging-System.
///
/// `level` und `format` kommen aus der Konfiguration und greifen nur,
/// wenn die Umgebung nichts vorgibt.
pub fn logging_initialisieren(level: &str, format: &str) {
    let filter = EnvFilter::try_from_env(LOG_LEVEL_ENV)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match log_format(format).as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_names(true)
                .with_current_span(true)
                .init();
        }
        _ => {
            // Thread-Namen zeigen, ob eine Zeile vom Mix-Thread stammt
            fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_names(true)
                .init();
        }
    }
}

/// Effektives Log-Format: Umgebung vor Konfiguration
pub fn log_format(konfiguriert: &str) -> String {
    std::env::var(LOG_FORMAT_ENV).unwrap_or_else(|_| konfiguriert.to_string())
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}
