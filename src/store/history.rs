use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::KvStore;

pub const TVL_BASELINE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

pub fn tvl_key(protocol: &str) -> String {
    format!("protocol:tvl:{}", protocol)
}

/// Per-pool TVL baselines kept in the key/value store. A baseline is taken
/// the first time a protocol is seen and lives for one window, so the change
/// reported against it spans at most that window.
pub struct TvlHistory {
    store: Arc<dyn KvStore>,
    window: Duration,
}

impl TvlHistory {
    pub fn new(store: Arc<dyn KvStore>, window: Duration) -> Self {
        Self { store, window }
    }

    /// Pool TVLs from the current baseline. When there is none, `current`
    /// becomes the new baseline and the result is empty.
    pub async fn baseline(&self, protocol: &str, current: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
        let key = tvl_key(protocol);

        match self.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(baseline) => return baseline,
                Err(e) => {
                    warn!("⚠️ Replacing malformed TVL baseline {}: {}", key, e);
                    if let Err(e) = self.store.delete(&key).await {
                        warn!("⚠️ Could not clear TVL baseline {}: {}", key, e);
                    }
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!("⚠️ TVL baseline unavailable for {}: {}", protocol, e);
                return BTreeMap::new();
            }
        }

        let raw = match serde_json::to_string(current) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("⚠️ Could not encode TVL baseline for {}: {}", protocol, e);
                return BTreeMap::new();
            }
        };

        // A concurrent writer may have started the baseline first; either is fine.
        match self.store.set_if_absent(&key, &raw, self.window).await {
            Ok(_) => debug!("📌 Started TVL baseline for {} ({} pools)", protocol, current.len()),
            Err(e) => warn!("⚠️ Could not store TVL baseline for {}: {}", protocol, e),
        }

        BTreeMap::new()
    }
}
