pub mod protocol;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use protocol::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolPosition {
    pub protocol: String,
    pub address: String,
    pub balance: Decimal,
    pub value: Decimal,
    pub apy: f64,
    pub health_factor: Option<f64>,
    pub rewards: Option<Decimal>,
}

/// All components are in `[0, 100]`, higher is riskier. `impermanent_loss`
/// is the expected impermanent loss in percent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskScore {
    pub overall: u8,
    pub liquidation: u8,
    pub impermanent_loss: u8,
    pub protocol: u8,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRisk {
    pub protocol: String,
    pub position_id: String,
    pub risk_score: RiskScore,
    pub liquidation_price: Option<f64>,
    pub current_price: Option<f64>,
    pub il_exposure: Option<f64>,
    pub warnings: Vec<RiskWarning>,
}

/// Variant order is the emission order of the threshold policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningType {
    Liquidation,
    ImpermanentLoss,
    Protocol,
    TvlChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl WarningType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningType::Liquidation => "LIQUIDATION",
            WarningType::ImpermanentLoss => "IMPERMANENT_LOSS",
            WarningType::Protocol => "PROTOCOL",
            WarningType::TvlChange => "TVL_CHANGE",
        }
    }
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    pub fn glyph(&self) -> &'static str {
        match self {
            Severity::Critical => "🚨",
            Severity::High => "⚠️",
            Severity::Medium => "⚡",
            Severity::Low => "ℹ️",
        }
    }
}

impl fmt::Display for WarningType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskWarning {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: WarningType,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl RiskWarning {
    pub fn new(kind: WarningType, severity: Severity, message: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            severity,
            message,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolHealthMetrics {
    pub name: String,
    pub tvl: f64,
    /// Percent change of TVL over the last 24h; negative is a drop.
    pub tvl_change_24h: f64,
    /// Absolute change of traded volume over the last 24h, in fiat.
    pub volume_change_24h: f64,
    pub user_count_24h: u64,
    pub last_updated: DateTime<Utc>,
}
