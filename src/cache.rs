//! # Custom Data Cache
//!
//! Persists the custom key-value data to a JSON file.
//!
//! The file is read once at start and rewritten (with a forced sync to
//! disk) every flush interval. A missing or broken file starts empty;
//! write failures are logged and retried on the next interval.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::CustomConfig;
use crate::error::Result;
use crate::store::SharedStore;

/// Read a JSON object from `path`
///
/// # Errors
///
/// Returns error if the file cannot be read or is not a JSON object
pub fn load(path: &Path) -> Result<Map<String, Value>> {
    let contents = std::fs::read_to_string(path)?;
    let object = serde_json::from_str(&contents)?;
    Ok(object)
}

/// Initial custom data: the cache file if enabled, with the seed merged over it
pub fn initial_data(config: &CustomConfig) -> Map<String, Value> {
    let mut data = Map::new();

    if config.cache {
        match load(Path::new(&config.cache_file)) {
            Ok(cached) => {
                info!("Loaded {} custom entries from {}", cached.len(), config.cache_file);
                data = cached;
            }
            Err(e) => warn!("Ignoring custom cache {}: {}", config.cache_file, e),
        }
    }

    if !config.seed.trim().is_empty() {
        match serde_json::from_str::<Map<String, Value>>(&config.seed) {
            Ok(seed) => data.extend(seed),
            Err(e) => warn!("Ignoring custom seed: {}", e),
        }
    }

    data
}

/// Write `data` to `path` and sync it to disk
///
/// # Errors
///
/// Returns error if the file cannot be written or synced
pub async fn flush(path: &Path, data: &Map<String, Value>) -> Result<()> {
    let bytes = serde_json::to_vec(data)?;

    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(&bytes).await?;
    file.sync_all().await?;
    Ok(())
}

/// Periodic writer of the custom data
#[derive(Debug, Clone)]
pub struct CacheFlusher {
    path: PathBuf,
    interval: Duration,
}

impl CacheFlusher {
    pub fn new(config: &CustomConfig) -> Self {
        Self {
            path: PathBuf::from(&config.cache_file),
            interval: Duration::from_secs(config.flush_interval_s),
        }
    }

    /// Flush the custom data of `store` forever
    pub async fn run(self, store: SharedStore) {
        info!("Flushing custom data to {} every {:?}", self.path.display(), self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.flush_once(&store).await;
        }
    }

    async fn flush_once(&self, store: &SharedStore) {
        let snapshot = store.read().custom.clone();

        match flush(&self.path, &snapshot).await {
            Ok(()) => debug!("Flushed {} custom entries", snapshot.len()),
            Err(e) => warn!("Failed to flush custom data to {}: {}", self.path.display(), e),
        }
    }
}
