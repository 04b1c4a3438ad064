pub mod dispatcher;
pub mod limiter;
pub mod notify;

use crate::config::RiskThresholds;
use crate::model::{RiskScore, RiskWarning, Severity, WarningType};
use chrono::{DateTime, Utc};

pub use dispatcher::{AlertDispatcher, DispatchOutcome};
pub use limiter::AlertRateLimiter;
pub use notify::NotificationManager;

/// Threshold checks for a position's risk score. Emits in the fixed order
/// LIQUIDATION, IMPERMANENT_LOSS, PROTOCOL, TVL_CHANGE.
pub fn evaluate(risk: &RiskScore, thresholds: &RiskThresholds) -> Vec<RiskWarning> {
    evaluate_with_tvl(risk, None, thresholds)
}

/// Like [`evaluate`], additionally checking the protocol's 24h TVL change
/// (percent, negative is a drop) when known.
pub fn evaluate_with_tvl(
    risk: &RiskScore,
    tvl_change_24h: Option<f64>,
    thresholds: &RiskThresholds,
) -> Vec<RiskWarning> {
    let mut warnings = Vec::new();
    let at = risk.timestamp;

    if let Some(w) = check_dimension(
        WarningType::Liquidation,
        risk.liquidation as f64,
        thresholds.liquidation_warning,
        thresholds.liquidation_critical,
        at,
        |v| format!("Position is at {:.0}% of its liquidation threshold", v),
    ) {
        warnings.push(w);
    }

    if let Some(w) = check_dimension(
        WarningType::ImpermanentLoss,
        risk.impermanent_loss as f64,
        thresholds.il_warning,
        thresholds.il_critical,
        at,
        |v| format!("Estimated impermanent loss of {:.0}%", v),
    ) {
        warnings.push(w);
    }

    if let Some(w) = check_dimension(
        WarningType::Protocol,
        risk.protocol as f64,
        thresholds.protocol_warning,
        thresholds.protocol_critical,
        at,
        |v| format!("Protocol risk score {:.0}", v),
    ) {
        warnings.push(w);
    }

    if let Some(change) = tvl_change_24h.filter(|c| c.is_finite()) {
        if let Some(w) = check_dimension(
            WarningType::TvlChange,
            -change,
            thresholds.tvl_change_warning,
            thresholds.tvl_change_critical,
            at,
            |v| format!("Protocol TVL dropped {:.1}% in 24h", v),
        ) {
            warnings.push(w);
        }
    }

    warnings
}

fn check_dimension(
    kind: WarningType,
    value: f64,
    warning: f64,
    critical: f64,
    timestamp: DateTime<Utc>,
    describe: impl Fn(f64) -> String,
) -> Option<RiskWarning> {
    let severity = if value >= critical {
        Severity::High
    } else if value >= warning {
        Severity::Medium
    } else {
        return None;
    };

    Some(RiskWarning::new(kind, severity, describe(value), timestamp))
}
