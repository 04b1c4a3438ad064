use log::{error, info};
use std::sync::Arc;
use std::time::Duration;

use crate::config::AlertSettings;
use crate::error::StoreError;
use crate::model::RiskWarning;
use crate::store::KvStore;

const COUNTER_WINDOW: Duration = Duration::from_secs(3600);

/// Per-address alert budget and per-(type, severity) de-duplication.
///
/// Store errors fail closed: the rate check returns the error so the caller
/// sends nothing, and an unverifiable dedup marker suppresses the warning.
pub struct AlertRateLimiter {
    store: Arc<dyn KvStore>,
    max_alerts_per_hour: u64,
    dedup_window: Duration,
}

pub fn counter_key(address: &str) -> String {
    format!("alerts:counter:{}", address)
}

pub fn dedup_key(address: &str, warning: &RiskWarning) -> String {
    format!("alert:{}:{}:{}", address, warning.kind, warning.severity)
}

impl AlertRateLimiter {
    pub fn new(store: Arc<dyn KvStore>, settings: &AlertSettings) -> Self {
        Self {
            store,
            max_alerts_per_hour: settings.max_alerts_per_hour as u64,
            dedup_window: Duration::from_secs(settings.dedup_window_secs),
        }
    }

    /// Whether `address` has used up its hourly budget. A store failure or an
    /// unreadable counter is an error, never a "no".
    pub async fn is_rate_limited(&self, address: &str) -> Result<bool, StoreError> {
        let key = counter_key(address);
        let count = match self.store.get(&key).await? {
            Some(raw) => raw.parse::<u64>().map_err(|e| StoreError::Malformed {
                key,
                reason: e.to_string(),
            })?,
            None => 0,
        };

        Ok(count >= self.max_alerts_per_hour)
    }

    /// Records the dedup marker for `warning` if none exists. Returns true
    /// when the warning should be sent.
    pub async fn admit(&self, address: &str, warning: &RiskWarning) -> bool {
        let key = dedup_key(address, warning);
        match self.store.set_if_absent(&key, "sent", self.dedup_window).await {
            Ok(true) => true,
            Ok(false) => {
                info!("🔕 Suppressing duplicate {} {} alert for {}", warning.severity, warning.kind, address);
                false
            }
            Err(e) => {
                error!("❌ Dedup check failed for {}, suppressing: {}", key, e);
                false
            }
        }
    }

    /// Drops the dedup marker for a warning that reached no channel, so the
    /// next cycle retries it.
    pub async fn release(&self, address: &str, warning: &RiskWarning) {
        let key = dedup_key(address, warning);
        if let Err(e) = self.store.delete(&key).await {
            error!("❌ Could not release dedup marker {}: {}", key, e);
        }
    }

    pub async fn record_sent(&self, address: &str) -> Result<u64, StoreError> {
        self.store.incr(&counter_key(address), COUNTER_WINDOW).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Severity, WarningType};
    use crate::store::MemoryStore;
    use crate::testing::FailingStore;
    use chrono::Utc;

    fn limiter(store: Arc<dyn KvStore>) -> AlertRateLimiter {
        AlertRateLimiter::new(store, &AlertSettings::default())
    }

    fn warning(kind: WarningType, severity: Severity, message: &str) -> RiskWarning {
        RiskWarning::new(kind, severity, message.to_string(), Utc::now())
    }

    #[tokio::test(start_paused = true)]
    async fn hourly_budget_expires_with_window() {
        let limiter = limiter(Arc::new(MemoryStore::new()));

        for _ in 0..9 {
            limiter.record_sent("addr").await.unwrap();
        }
        assert!(!limiter.is_rate_limited("addr").await.unwrap());

        limiter.record_sent("addr").await.unwrap();
        assert!(limiter.is_rate_limited("addr").await.unwrap());
        assert!(!limiter.is_rate_limited("other").await.unwrap());

        tokio::time::advance(Duration::from_secs(3601)).await;
        assert!(!limiter.is_rate_limited("addr").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn dedup_is_per_type_and_severity() {
        let limiter = limiter(Arc::new(MemoryStore::new()));
        let medium = warning(WarningType::Liquidation, Severity::Medium, "at 85%");

        assert!(limiter.admit("addr", &medium).await);
        assert!(!limiter.admit("addr", &warning(WarningType::Liquidation, Severity::Medium, "at 88%")).await);
        assert!(limiter.admit("addr", &warning(WarningType::Liquidation, Severity::High, "at 95%")).await);
        assert!(limiter.admit("other", &medium).await);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(limiter.admit("addr", &medium).await);
    }

    #[tokio::test]
    async fn store_failure_fails_closed() {
        let limiter = limiter(Arc::new(FailingStore));

        assert!(limiter.is_rate_limited("addr").await.is_err());
        assert!(!limiter.admit("addr", &warning(WarningType::Protocol, Severity::High, "x")).await);
        assert!(limiter.record_sent("addr").await.is_err());
    }

    #[tokio::test]
    async fn corrupt_counter_fails_closed() {
        let store = Arc::new(MemoryStore::new());
        store.set(&counter_key("addr"), "garbage", COUNTER_WINDOW).await.unwrap();

        assert!(matches!(
            limiter(store).is_rate_limited("addr").await,
            Err(StoreError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn released_marker_admits_again() {
        let limiter = limiter(Arc::new(MemoryStore::new()));
        let w = warning(WarningType::Liquidation, Severity::High, "at 95%");

        assert!(limiter.admit("addr", &w).await);
        limiter.release("addr", &w).await;
        assert!(limiter.admit("addr", &w).await);
        assert!(!limiter.admit("addr", &w).await);
    }

    #[test]
    fn key_layout() {
        let w = warning(WarningType::ImpermanentLoss, Severity::High, "x");
        assert_eq!(counter_key("W1"), "alerts:counter:W1");
        assert_eq!(dedup_key("W1", &w), "alert:W1:IMPERMANENT_LOSS:HIGH");
    }
}
