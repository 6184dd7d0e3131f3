//! # MAV Bridge
//!
//! Mirror a MAVLink vehicle behind a JSON API.
//!
//! The process runs three tasks side by side: the link supervisor, the
//! HTTP server and (when enabled) the custom data cache flusher.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use mav_bridge::cache::{self, CacheFlusher};
use mav_bridge::config::Config;
use mav_bridge::http::{self, AppState};
use mav_bridge::link::{LinkHandle, MavlinkConnector, Supervisor};
use mav_bridge::protocol::registry::Registry;
use mav_bridge::relay::CommandRelay;
use mav_bridge::store::{SharedStore, State};

/// Configuration used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Main entry point for MAV Bridge
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Set up logging with a non-blocking stdout writer
///    - Load configuration (first argument, or `config/default.toml`)
///    - Build the shared store, seeding custom data from cache and seed
///
/// 2. **Run**
///    - Supervise the vehicle link
///    - Serve the HTTP API
///    - Flush custom data periodically
///
/// 3. **Shutdown**
///    - Ctrl+C, or the HTTP server failing, ends the process
///    - The supervisor is cancelled, which drops the open transport
///
/// # Errors
///
/// Returns error if the configuration file exists but is invalid
///
/// # Examples
///
/// ```bash
/// mav-bridge config/default.toml
/// RUST_LOG=mav_bridge=debug mav-bridge
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let (writer, _guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("MAV Bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&path)?;

    let mut state = State::new(&config);
    state.custom = cache::initial_data(&config.custom);
    let store = SharedStore::new(state);
    let link = LinkHandle::new();

    let connector = MavlinkConnector {
        system_id: config.link.source_system,
        component_id: config.link.source_component,
    };
    let supervisor = Supervisor::new(&config, store.clone(), link.clone(), Arc::new(connector));
    let supervisor = tokio::spawn(supervisor.run());

    if config.custom.cache {
        tokio::spawn(CacheFlusher::new(&config.custom).run(store.clone()));
    }

    let relay = CommandRelay::new(store.clone(), link, Arc::new(Registry::new()));
    let app = AppState { store, relay };

    let result = tokio::select! {
        result = http::serve(&config.http, app) => {
            if let Err(e) = &result {
                error!("HTTP server stopped: {}", e);
            }
            result.context("HTTP server failed")
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            Ok(())
        }
    };

    supervisor.abort();
    if let Err(e) = supervisor.await {
        if !e.is_cancelled() {
            error!("Link supervisor failed: {}", e);
        }
    }
    info!("MAV Bridge stopped");

    result
}

/// Load `path`, falling back to defaults when the file does not exist
fn load_config(path: &str) -> Result<Config> {
    if !Path::new(path).exists() {
        warn!("No configuration at {}, using defaults", path);
        return Ok(Config::default());
    }

    let config = Config::load(path).with_context(|| format!("Failed to load configuration from {}", path))?;
    info!("Loaded configuration from {}", path);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_config_uses_defaults() {
        let config = load_config("/nonexistent/mav-bridge.toml").unwrap();
        assert_eq!(config.http.port, 2609);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[link]\naddress = \"\"").unwrap();

        assert!(load_config(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/default.toml");
        let config = load_config(path).unwrap();
        assert_eq!(config.link.address, "tcpout:127.0.0.1:5760");
    }
}
