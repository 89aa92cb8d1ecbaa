//! Mischpult Server – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den Server.

use anyhow::Result;
use mischpult_observability::logging_initialisieren;
use mischpult_server::{config::ServerConfig, Server};

#[tokio::main]
async fn main() -> Result<()> {
    let config_pfad = std::env::var("MISCHPULT_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = ServerConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        udp = %config.udp_bind_adresse(),
        codec = config.mixer.send_codec.format.name(),
        "Mischpult Server wird initialisiert"
    );

    Server::neu(config).starten().await
}
