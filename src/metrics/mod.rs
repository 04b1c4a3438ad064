use crate::model::*;
use crate::store::{MetricPoint, POSITION_RISKS, PROTOCOL_HEALTH, PROTOCOL_POSITIONS};
use rust_decimal::prelude::*;

pub mod health;
pub mod risk;

pub use health::ProtocolHealthEvaluator;
pub use risk::RiskScorer;

pub fn position_risk_point(risk: &PositionRisk) -> MetricPoint {
    MetricPoint::new(POSITION_RISKS)
        .tag("protocol", risk.protocol.as_str())
        .tag("position", risk.position_id.as_str())
        .field("overall_risk", risk.risk_score.overall as f64)
        .field("liquidation_risk", risk.risk_score.liquidation as f64)
        .field("il_risk", risk.risk_score.impermanent_loss as f64)
        .field("protocol_risk", risk.risk_score.protocol as f64)
        .field("warning_count", risk.warnings.len() as f64)
        .at(risk.risk_score.timestamp)
}

pub fn protocol_position_point(position: &ProtocolPosition) -> MetricPoint {
    MetricPoint::new(PROTOCOL_POSITIONS)
        .tag("protocol", position.protocol.as_str())
        .tag("address", position.address.as_str())
        .field("balance", position.balance.to_f64().unwrap_or(0.0))
        .field("value", position.value.to_f64().unwrap_or(0.0))
        .field("apy", position.apy)
}

pub fn protocol_health_point(health: &ProtocolHealthMetrics, risk: f64) -> MetricPoint {
    MetricPoint::new(PROTOCOL_HEALTH)
        .tag("protocol", health.name.as_str())
        .field("tvl", health.tvl)
        .field("tvl_change_24h", health.tvl_change_24h)
        .field("volume_change_24h", health.volume_change_24h)
        .field("user_count", health.user_count_24h as f64)
        .field("risk_score", risk)
        .at(health.last_updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn position_risk_point_carries_all_dimensions() {
        let risk = PositionRisk {
            protocol: "Kamino".to_string(),
            position_id: "pos-1".to_string(),
            risk_score: RiskScore::from_components(90.0, 4.0, 35.0, Utc::now()),
            liquidation_price: None,
            current_price: None,
            il_exposure: Some(4.0),
            warnings: vec![],
        };

        let point = position_risk_point(&risk);
        assert_eq!(point.measurement, "position_risks");
        assert_eq!(point.tags["protocol"], "Kamino");
        assert_eq!(point.tags["position"], "pos-1");
        assert_eq!(point.fields["liquidation_risk"], 90.0);
        assert_eq!(point.fields["il_risk"], 4.0);
        assert_eq!(point.fields["overall_risk"], risk.risk_score.overall as f64);
    }

    #[test]
    fn position_point_converts_decimals() {
        let position = ProtocolPosition {
            protocol: "Marinade".to_string(),
            address: "W1".to_string(),
            balance: dec!(2.5),
            value: dec!(2.75),
            apy: 7.1,
            health_factor: None,
            rewards: None,
        };

        let point = protocol_position_point(&position);
        assert_eq!(point.fields["balance"], 2.5);
        assert_eq!(point.fields["value"], 2.75);
    }
}
