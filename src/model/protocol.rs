use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unaggregated protocol snapshot as returned by a health source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawProtocolMetrics {
    pub name: String,
    pub pools: Vec<PoolSnapshot>,
    pub active_users_24h: Option<u64>,
    pub observed_at: DateTime<Utc>,
}

/// One pool, vault or strategy within a protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub id: String,
    pub tvl: f64,
    pub tvl_24h_ago: Option<f64>,
    pub volume_change_24h: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(dead_code)]
pub struct KaminoStrategyMetrics {
    pub strategy_pubkey: String,
    pub tvl: f64,
    pub pnl: f64,
    pub apy: f64,
    pub token_a_mint: String,
    pub token_b_mint: String,
    pub status: String,
}

impl From<&KaminoStrategyMetrics> for PoolSnapshot {
    fn from(strategy: &KaminoStrategyMetrics) -> Self {
        Self {
            id: strategy.strategy_pubkey.clone(),
            tvl: strategy.tvl,
            tvl_24h_ago: None,
            volume_change_24h: strategy.pnl,
        }
    }
}
