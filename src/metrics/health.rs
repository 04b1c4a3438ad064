use crate::alert::dispatcher::{AlertDispatcher, DispatchOutcome};
use crate::config::AlertSettings;
use crate::error::AlertError;
use crate::model::*;
use log::{info, warn};
use std::sync::Arc;

/// Aggregates protocol-wide metrics into a composite risk score and raises a
/// PROTOCOL alert when the score crosses the configured threshold.
pub struct ProtocolHealthEvaluator {
    dispatcher: Arc<AlertDispatcher>,
    alert_threshold: f64,
    critical_threshold: f64,
    system_address: String,
}

impl ProtocolHealthEvaluator {
    pub fn new(dispatcher: Arc<AlertDispatcher>, settings: &AlertSettings) -> Self {
        Self {
            dispatcher,
            alert_threshold: settings.protocol_alert_threshold,
            critical_threshold: settings.protocol_critical_threshold,
            system_address: settings.system_address.clone(),
        }
    }

    pub fn evaluate(raw: &RawProtocolMetrics) -> ProtocolHealthMetrics {
        let tvl: f64 = raw.pools.iter().map(|p| finite_or_zero(p.tvl)).sum();

        let (current_with_history, previous): (f64, f64) = raw.pools
            .iter()
            .filter_map(|p| p.tvl_24h_ago.map(|prev| (finite_or_zero(p.tvl), finite_or_zero(prev))))
            .fold((0.0, 0.0), |(cur, prev), (c, p)| (cur + c, prev + p));

        let tvl_change_24h = if previous > 0.0 {
            (current_with_history - previous) / previous * 100.0
        } else {
            0.0
        };

        let volume_change_24h = raw.pools
            .iter()
            .map(|p| finite_or_zero(p.volume_change_24h))
            .sum();

        ProtocolHealthMetrics {
            name: raw.name.clone(),
            tvl,
            tvl_change_24h,
            volume_change_24h,
            user_count_24h: raw.active_users_24h.unwrap_or(raw.pools.len() as u64),
            last_updated: raw.observed_at,
        }
    }

    /// `0.6 * |tvl change %| + 0.4 * |volume change / tvl|`, clamped to `[0, 100]`.
    /// A zero TVL contributes no volume term.
    pub fn risk(health: &ProtocolHealthMetrics) -> f64 {
        let tvl_risk = finite_or_zero(health.tvl_change_24h).abs() * 0.6;

        let volume_ratio = if health.tvl > 0.0 && health.tvl.is_finite() {
            finite_or_zero(health.volume_change_24h / health.tvl)
        } else {
            0.0
        };
        let volume_risk = volume_ratio.abs() * 0.4;

        (tvl_risk + volume_risk).clamp(0.0, 100.0)
    }

    pub fn synthesize_warning(&self, health: &ProtocolHealthMetrics, risk: f64) -> Option<RiskWarning> {
        if risk <= self.alert_threshold {
            return None;
        }

        let severity = if risk > self.critical_threshold {
            Severity::Critical
        } else {
            Severity::High
        };

        Some(RiskWarning::new(
            WarningType::Protocol,
            severity,
            format!("High-risk alert for {}. Risk Score: {:.1}", health.name, risk),
            health.last_updated,
        ))
    }

    /// Scores `health` and dispatches a protocol alert if warranted. Returns
    /// the computed risk.
    pub async fn check(&self, health: &ProtocolHealthMetrics) -> Result<f64, AlertError> {
        let risk = Self::risk(health);

        if let Some(warning) = self.synthesize_warning(health, risk) {
            warn!("🏥 {} protocol risk {:.1} exceeds {:.0}", health.name, risk, self.alert_threshold);
            let outcome = self.dispatcher.dispatch(&[warning], &self.system_address).await?;
            if let DispatchOutcome::Sent { .. } = outcome {
                info!("🔔 Protocol alert for {} dispatched", health.name);
            }
        }

        Ok(risk)
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}
