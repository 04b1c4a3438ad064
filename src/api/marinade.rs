use anyhow::{Result, anyhow};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use rust_decimal::prelude::*;
use serde_json::{Value, json};

use crate::api::provider::{ProtocolAdapter, parse_decimal};
use crate::config::ProtocolSettings;
use crate::model::*;

pub const MSOL_MINT: &str = "mSoLzYCxHdYgdzU16g5QSh3i5K3z3KZK7ytfqcJm7So";

/// mSOL liquid staking positions. Balances come from Solana JSON-RPC, price
/// and APY from the Marinade API.
pub struct MarinadeAdapter {
    client: Client,
    rpc_url: String,
    api_url: String,
}

impl MarinadeAdapter {
    pub fn new(client: Client, settings: &ProtocolSettings) -> Self {
        Self {
            client,
            rpc_url: settings.solana_rpc_url.clone(),
            api_url: settings.marinade_api_url.trim_end_matches('/').to_string(),
        }
    }

    async fn rpc_request(&self, method: &str, params: Value) -> Result<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response: Value = self.client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.get("error") {
            return Err(anyhow!("{} failed: {}", method, err));
        }

        response
            .get("result")
            .cloned()
            .ok_or_else(|| anyhow!("{} returned no result", method))
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.api_url, path);
        Ok(self.client.get(url).send().await?.error_for_status()?.json().await?)
    }

    async fn get_msol_price(&self) -> Result<Decimal> {
        let value = self.get_json("/msol/price_sol").await?;
        value
            .as_f64()
            .and_then(Decimal::from_f64)
            .ok_or_else(|| anyhow!("unexpected mSOL price payload: {}", value))
    }
}

#[async_trait]
impl ProtocolAdapter for MarinadeAdapter {
    fn name(&self) -> &str {
        "Marinade"
    }

    async fn get_positions(&self, address: &str) -> Result<Vec<ProtocolPosition>> {
        debug!("🔍 [Marinade] Checking positions for {}", address);

        let accounts = self
            .rpc_request(
                "getTokenAccountsByOwner",
                json!([address, { "mint": MSOL_MINT }, { "encoding": "jsonParsed" }]),
            )
            .await?;

        let balance = sum_token_balance(&accounts)?;
        if balance.is_zero() {
            return Ok(vec![]);
        }

        let price = self.get_msol_price().await?;
        let apy = self.get_apy().await?;
        let value = balance * price;
        let rewards = Decimal::from_f64(apy / 100.0).map(|rate| value * rate);

        info!("🔍 [Marinade] {} holds {} mSOL ({} SOL, {:.2}% APY)", address, balance, value, apy);

        Ok(vec![ProtocolPosition {
            protocol: self.name().to_string(),
            address: address.to_string(),
            balance,
            value,
            apy,
            health_factor: None,
            rewards,
        }])
    }

    async fn get_apy(&self) -> Result<f64> {
        let value = self.get_json("/msol/apy/30d").await?;
        value
            .get("value")
            .and_then(Value::as_f64)
            .map(|ratio| ratio * 100.0)
            .ok_or_else(|| anyhow!("unexpected mSOL APY payload: {}", value))
    }
}

/// Sums `uiAmountString` over a `getTokenAccountsByOwner` jsonParsed result.
pub fn sum_token_balance(result: &Value) -> Result<Decimal> {
    let accounts = result
        .get("value")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("token account result has no value array"))?;

    Ok(accounts
        .iter()
        .filter_map(|account| {
            account
                .pointer("/account/data/parsed/info/tokenAmount/uiAmountString")
                .and_then(Value::as_str)
        })
        .map(parse_decimal)
        .sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn token_account(amount: &str) -> Value {
        json!({
            "pubkey": "acct",
            "account": {
                "data": {
                    "parsed": {
                        "info": {
                            "mint": MSOL_MINT,
                            "tokenAmount": { "uiAmountString": amount, "decimals": 9 }
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn sums_all_msol_accounts() {
        let result = json!({ "context": { "slot": 1 }, "value": [token_account("1.5"), token_account("2.25")] });
        assert_eq!(sum_token_balance(&result).unwrap(), dec!(3.75));
    }

    #[test]
    fn empty_wallet_has_zero_balance() {
        let result = json!({ "value": [] });
        assert!(sum_token_balance(&result).unwrap().is_zero());
    }

    #[test]
    fn malformed_result_is_an_error() {
        assert!(sum_token_balance(&json!({ "unexpected": true })).is_err());
    }
}
