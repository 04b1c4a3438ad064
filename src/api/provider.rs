use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::join_all;
use log::{debug, error};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::model::*;

/// One DeFi protocol integration.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn get_positions(&self, address: &str) -> Result<Vec<ProtocolPosition>>;

    #[allow(dead_code)]
    async fn get_apy(&self) -> Result<f64>;
}

/// Supplier of protocol-wide metrics for health evaluation.
#[async_trait]
pub trait HealthSource: Send + Sync {
    fn name(&self) -> &str;

    async fn get_raw_metrics(&self) -> Result<RawProtocolMetrics>;
}

pub struct PositionFetch {
    pub positions: Vec<ProtocolPosition>,
    pub failures: Vec<(String, anyhow::Error)>,
}

/// Adapters keyed by protocol name. Registering a name twice replaces the
/// earlier adapter.
#[derive(Default)]
pub struct ProtocolRegistry {
    adapters: BTreeMap<String, Arc<dyn ProtocolAdapter>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ProtocolAdapter>) {
        debug!("🔌 Registered protocol adapter {}", adapter.name());
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    #[allow(dead_code)]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ProtocolAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    /// Queries every adapter concurrently. A failing adapter is reported in
    /// `failures` and contributes no positions.
    pub async fn get_all_positions(&self, address: &str) -> PositionFetch {
        let fetches = self.adapters.values().map(|adapter| async move {
            (adapter.name().to_string(), adapter.get_positions(address).await)
        });

        let mut positions = Vec::new();
        let mut failures = Vec::new();

        for (name, result) in join_all(fetches).await {
            match result {
                Ok(found) => {
                    debug!("📥 {} returned {} position(s) for {}", name, found.len(), address);
                    positions.extend(found);
                }
                Err(e) => {
                    error!("❌ Error fetching positions for {}: {:#}", name, e);
                    failures.push((name, e));
                }
            }
        }

        PositionFetch { positions, failures }
    }
}

pub fn parse_decimal(s: &str) -> rust_decimal::Decimal {
    s.parse().unwrap_or_else(|_| rust_decimal::Decimal::ZERO)
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use anyhow::anyhow;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Adapter returning a fixed health factor for any address.
    pub struct StaticAdapter {
        pub name: String,
        pub health_factor: Option<f64>,
        pub calls: AtomicUsize,
    }

    impl StaticAdapter {
        pub fn new(name: &str, health_factor: Option<f64>) -> Self {
            Self { name: name.to_string(), health_factor, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl ProtocolAdapter for StaticAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn get_positions(&self, address: &str) -> Result<Vec<ProtocolPosition>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![ProtocolPosition {
                protocol: self.name.clone(),
                address: format!("{}-{}", self.name, address),
                balance: dec!(10),
                value: dec!(1500),
                apy: 6.5,
                health_factor: self.health_factor,
                rewards: None,
            }])
        }

        async fn get_apy(&self) -> Result<f64> {
            Ok(6.5)
        }
    }

    pub struct BrokenAdapter;

    #[async_trait]
    impl ProtocolAdapter for BrokenAdapter {
        fn name(&self) -> &str {
            "Broken"
        }

        async fn get_positions(&self, _address: &str) -> Result<Vec<ProtocolPosition>> {
            Err(anyhow!("rpc timeout"))
        }

        async fn get_apy(&self) -> Result<f64> {
            Err(anyhow!("rpc timeout"))
        }
    }

    #[tokio::test]
    async fn partial_failure_keeps_other_protocols() {
        let mut registry = ProtocolRegistry::new();
        registry.register(Arc::new(StaticAdapter::new("Marinade", None)));
        registry.register(Arc::new(BrokenAdapter));

        let fetch = registry.get_all_positions("W1").await;

        assert_eq!(fetch.positions.len(), 1);
        assert_eq!(fetch.positions[0].protocol, "Marinade");
        assert_eq!(fetch.failures.len(), 1);
        assert_eq!(fetch.failures[0].0, "Broken");
    }

    #[test]
    fn registry_is_keyed_by_name() {
        let mut registry = ProtocolRegistry::new();
        registry.register(Arc::new(StaticAdapter::new("Kamino", None)));
        registry.register(Arc::new(StaticAdapter::new("Kamino", Some(1.2))));
        registry.register(Arc::new(StaticAdapter::new("Marinade", None)));

        assert_eq!(registry.names(), vec!["Kamino".to_string(), "Marinade".to_string()]);
        assert!(registry.get("Kamino").is_some());
        assert!(registry.get("Drift").is_none());
    }

    #[test]
    fn parse_decimal_defaults_to_zero() {
        assert_eq!(parse_decimal("12.50"), dec!(12.50));
        assert_eq!(parse_decimal("n/a"), dec!(0));
    }
}
