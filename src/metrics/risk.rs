use crate::config::RiskProfile;
use crate::model::*;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Protocol risk assumed for protocols without a configured profile.
pub const UNKNOWN_PROTOCOL_RISK: f64 = 50.0;

/// APY (percent) above which yield itself is treated as a risk signal.
const YIELD_PREMIUM_FLOOR: f64 = 20.0;
const YIELD_PREMIUM_CAP: f64 = 30.0;

// overall = PEAK_WEIGHT * max(L, I, P) + (1 - PEAK_WEIGHT) * (0.5 L + 0.2 I + 0.3 P)
const PEAK_WEIGHT: f64 = 0.6;
const LIQUIDATION_WEIGHT: f64 = 0.5;
const IL_WEIGHT: f64 = 0.2;
const PROTOCOL_WEIGHT: f64 = 0.3;

/// Turns position snapshots into [`RiskScore`]s. Never fails: missing or
/// non-finite inputs fall back to the defaults documented on each helper.
#[derive(Debug, Clone, Default)]
pub struct RiskScorer {
    profiles: BTreeMap<String, RiskProfile>,
}

impl RiskScorer {
    pub fn new(profiles: BTreeMap<String, RiskProfile>) -> Self {
        Self { profiles }
    }

    pub fn score(&self, position: &ProtocolPosition) -> RiskScore {
        self.score_at(position, Utc::now())
    }

    pub fn score_at(&self, position: &ProtocolPosition, timestamp: DateTime<Utc>) -> RiskScore {
        let profile = self.profiles.get(&position.protocol);

        let liquidation = calculate_liquidation_risk(position.health_factor);
        let impermanent_loss = calculate_il_risk(profile);
        let protocol = calculate_protocol_risk(profile, position.apy);

        RiskScore::from_components(liquidation, impermanent_loss, protocol, timestamp)
    }

    /// Binds a score and the policy's warnings into a [`PositionRisk`].
    pub fn position_risk(
        &self,
        position: &ProtocolPosition,
        risk_score: RiskScore,
        warnings: Vec<RiskWarning>,
    ) -> PositionRisk {
        PositionRisk {
            protocol: position.protocol.clone(),
            position_id: position.address.clone(),
            il_exposure: self.profiles.get(&position.protocol).map(|p| p.il_exposure_pct),
            risk_score,
            liquidation_price: None,
            current_price: None,
            warnings,
        }
    }
}

impl RiskScore {
    pub fn from_components(
        liquidation: f64,
        impermanent_loss: f64,
        protocol: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let liquidation = to_score(liquidation);
        let impermanent_loss = to_score(impermanent_loss);
        let protocol = to_score(protocol);

        Self {
            overall: combine_overall(liquidation, impermanent_loss, protocol),
            liquidation,
            impermanent_loss,
            protocol,
            timestamp,
        }
    }
}

/// Monotonic non-decreasing in every argument.
pub fn combine_overall(liquidation: u8, impermanent_loss: u8, protocol: u8) -> u8 {
    let (l, i, p) = (liquidation as f64, impermanent_loss as f64, protocol as f64);

    let peak = l.max(i).max(p);
    let weighted = l * LIQUIDATION_WEIGHT + i * IL_WEIGHT + p * PROTOCOL_WEIGHT;

    to_score(peak * PEAK_WEIGHT + weighted * (1.0 - PEAK_WEIGHT))
}

/// Proximity to liquidation as a percentage: `100 / health_factor`.
///
/// No health factor means an unleveraged position (0). A non-finite factor
/// is unknown and scores mid-scale.
pub fn calculate_liquidation_risk(health_factor: Option<f64>) -> f64 {
    match health_factor {
        None => 0.0,
        Some(hf) if hf.is_nan() => 50.0,
        Some(hf) if hf <= 1.0 => 100.0,
        Some(hf) => (100.0 / hf).clamp(0.0, 100.0),
    }
}

pub fn calculate_il_risk(profile: Option<&RiskProfile>) -> f64 {
    profile
        .map(|p| p.il_exposure_pct)
        .filter(|il| il.is_finite())
        .unwrap_or(0.0)
        .clamp(0.0, 100.0)
}

pub fn calculate_protocol_risk(profile: Option<&RiskProfile>, apy: f64) -> f64 {
    let base = profile
        .map(|p| p.base_risk)
        .filter(|r| r.is_finite())
        .unwrap_or(UNKNOWN_PROTOCOL_RISK);

    let yield_premium = if apy.is_finite() {
        ((apy - YIELD_PREMIUM_FLOOR) / 2.0).clamp(0.0, YIELD_PREMIUM_CAP)
    } else {
        0.0
    };

    (base + yield_premium).clamp(0.0, 100.0)
}

fn to_score(value: f64) -> u8 {
    if value.is_nan() {
        return 50;
    }
    value.round().clamp(0.0, 100.0) as u8
}
