use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use reqwest::Client;
use rust_decimal::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::api::provider::{HealthSource, ProtocolAdapter, parse_decimal};
use crate::config::ProtocolSettings;
use crate::model::*;
use crate::store::TvlHistory;

const PROTOCOL: &str = "Kamino";

#[derive(Clone)]
struct KaminoApi {
    client: Client,
    base_url: String,
    env: String,
}

impl KaminoApi {
    fn new(client: Client, settings: &ProtocolSettings) -> Self {
        Self {
            client,
            base_url: settings.kamino_api_url.trim_end_matches('/').to_string(),
            env: settings.kamino_env.clone(),
        }
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        Ok(self.client
            .get(url)
            .query(&[("env", self.env.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn strategy_metrics(&self) -> Result<Vec<KaminoStrategyMetrics>> {
        convert_strategy_metrics(&self.get("/strategies/metrics").await?)
    }
}

/// Kamino liquidity positions held by a wallet.
pub struct KaminoAdapter {
    api: KaminoApi,
}

impl KaminoAdapter {
    pub fn new(client: Client, settings: &ProtocolSettings) -> Self {
        Self { api: KaminoApi::new(client, settings) }
    }
}

#[async_trait]
impl ProtocolAdapter for KaminoAdapter {
    fn name(&self) -> &str {
        PROTOCOL
    }

    async fn get_positions(&self, address: &str) -> Result<Vec<ProtocolPosition>> {
        debug!("🔍 [Kamino] Checking positions for {}", address);

        let data = self.api.get(&format!("/user/{}/positions", address)).await?;
        let positions = convert_user_positions(&data)?;

        if !positions.is_empty() {
            info!("🔍 [Kamino] {} holds {} position(s)", address, positions.len());
        }
        Ok(positions)
    }

    async fn get_apy(&self) -> Result<f64> {
        let strategies = self.api.strategy_metrics().await?;
        if strategies.is_empty() {
            return Ok(0.0);
        }
        let total: f64 = strategies.iter().map(|s| s.apy).sum();
        Ok(total / strategies.len() as f64 * 100.0)
    }
}

/// Kamino strategy metrics as a protocol-health source. TVL history comes
/// from `history`, since the API only reports current values.
pub struct KaminoHealthSource {
    api: KaminoApi,
    history: TvlHistory,
}

impl KaminoHealthSource {
    pub fn new(client: Client, settings: &ProtocolSettings, history: TvlHistory) -> Self {
        Self { api: KaminoApi::new(client, settings), history }
    }

    pub async fn snapshot(&self, strategies: &[KaminoStrategyMetrics]) -> RawProtocolMetrics {
        let current: BTreeMap<String, f64> = strategies
            .iter()
            .map(|s| (s.strategy_pubkey.clone(), s.tvl))
            .collect();
        let baseline = self.history.baseline(PROTOCOL, &current).await;

        let pools = strategies
            .iter()
            .map(|strategy| PoolSnapshot {
                tvl_24h_ago: baseline.get(&strategy.strategy_pubkey).copied(),
                ..PoolSnapshot::from(strategy)
            })
            .collect();

        RawProtocolMetrics {
            name: PROTOCOL.to_string(),
            pools,
            active_users_24h: None,
            observed_at: Utc::now(),
        }
    }
}

#[async_trait]
impl HealthSource for KaminoHealthSource {
    fn name(&self) -> &str {
        PROTOCOL
    }

    async fn get_raw_metrics(&self) -> Result<RawProtocolMetrics> {
        let strategies = self.api.strategy_metrics().await?;
        debug!("📥 Kamino returned {} strategies", strategies.len());

        Ok(self.snapshot(&strategies).await)
    }
}

pub fn convert_strategy_metrics(data: &Value) -> Result<Vec<KaminoStrategyMetrics>> {
    let items = data
        .as_array()
        .ok_or_else(|| anyhow!("Kamino strategy metrics is not an array"))?;

    Ok(items
        .iter()
        .filter_map(|item| {
            let strategy_pubkey = item.get("strategy")?.as_str()?.to_string();
            Some(KaminoStrategyMetrics {
                strategy_pubkey,
                tvl: number(item.get("totalValueLocked")),
                pnl: number(item.get("profitAndLoss")),
                apy: number(item.pointer("/apy/totalApy")),
                token_a_mint: text(item.get("tokenAMint")),
                token_b_mint: text(item.get("tokenBMint")),
                status: item.get("status").and_then(Value::as_str).unwrap_or("unknown").to_string(),
            })
        })
        .collect())
}

/// Parses `/user/<wallet>/positions`. APYs arrive as ratios and are
/// reported as percentages. Positions without a reported health factor or
/// LTV pair carry none.
pub fn convert_user_positions(data: &Value) -> Result<Vec<ProtocolPosition>> {
    let items = data
        .as_array()
        .or_else(|| data.get("positions").and_then(Value::as_array))
        .ok_or_else(|| anyhow!("Kamino user positions is not an array"))?;

    Ok(items
        .iter()
        .filter_map(|item| {
            let id = ["strategy", "strategyPubkey", "position"]
                .iter()
                .find_map(|key| item.get(*key).and_then(Value::as_str))?;

            let balance = decimal(first(item, &["sharesAmount", "shares", "balance"]));
            if balance.is_zero() {
                return None;
            }

            let apy = opt_number(item.pointer("/apy/totalApy"))
                .or_else(|| opt_number(item.get("apy")))
                .unwrap_or(0.0);

            Some(ProtocolPosition {
                protocol: PROTOCOL.to_string(),
                address: id.to_string(),
                balance,
                value: decimal(first(item, &["usdValue", "totalValue", "value"])),
                apy: apy * 100.0,
                health_factor: health_factor(item),
                rewards: first(item, &["rewardsUsd", "rewards"]).map(|v| decimal(Some(v))),
            })
        })
        .collect())
}

fn health_factor(item: &Value) -> Option<f64> {
    if let Some(hf) = opt_number(item.get("healthFactor")) {
        return Some(hf);
    }

    let ltv = opt_number(item.get("ltv"))?;
    let liquidation_ltv = opt_number(item.get("liquidationLtv"))?;
    (ltv > 0.0 && liquidation_ltv > 0.0).then(|| liquidation_ltv / ltv)
}

fn first<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| item.get(*key).filter(|v| !v.is_null()))
}

/// Kamino encodes most numbers as strings.
fn opt_number(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::String(s)) => s.parse().ok(),
        Some(Value::Number(n)) => n.as_f64(),
        _ => None,
    }
}

fn number(value: Option<&Value>) -> f64 {
    opt_number(value).unwrap_or(0.0)
}

fn decimal(value: Option<&Value>) -> Decimal {
    match value {
        Some(Value::String(s)) => parse_decimal(s),
        Some(Value::Number(n)) => n.as_f64().and_then(Decimal::from_f64).unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    }
}

fn text(value: Option<&Value>) -> String {
    value.and_then(Value::as_str).unwrap_or_default().to_string()
}
