use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;

use super::limiter::AlertRateLimiter;
use super::notify::{NotificationManager, format_message};
use crate::error::AlertError;
use crate::model::RiskWarning;
use crate::store::{MetricPoint, MetricsRecorder, RISK_ALERTS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The address had exhausted its hourly budget; nothing was done.
    RateLimited,
    /// Every warning was a duplicate within the dedup window.
    Suppressed,
    /// No channel accepted any admitted warning; their dedup markers were
    /// released so a later dispatch retries them.
    Undelivered { alerts: usize },
    Sent { alerts: usize, budget_used: u64 },
}

pub struct AlertDispatcher {
    limiter: AlertRateLimiter,
    notifier: NotificationManager,
    metrics: MetricsRecorder,
}

impl AlertDispatcher {
    pub fn new(limiter: AlertRateLimiter, notifier: NotificationManager, metrics: MetricsRecorder) -> Self {
        Self { limiter, notifier, metrics }
    }

    /// Sends every admitted warning, in the given order, to all channels and
    /// records each delivered one as a `risk_alerts` point.
    ///
    /// The hourly budget is charged once per call, and only if at least one
    /// warning was delivered. Channel failures never surface here; rate
    /// limiter store failures do.
    pub async fn dispatch(&self, warnings: &[RiskWarning], address: &str) -> Result<DispatchOutcome, AlertError> {
        if warnings.is_empty() {
            return Ok(DispatchOutcome::Suppressed);
        }

        if self.limiter.is_rate_limited(address).await? {
            info!("🚦 Alert rate limit reached for {}", address);
            return Ok(DispatchOutcome::RateLimited);
        }

        let mut sent = 0;
        let mut undelivered = 0;
        for warning in warnings {
            if !self.limiter.admit(address, warning).await {
                continue;
            }

            let message = format_message(address, warning);
            let report = self.notifier.send_all(&message).await;

            if report.delivered == 0 && self.notifier.channel_count() > 0 {
                error!("❌ Alert {} for {} reached no channel, will retry", warning.id, address);
                self.limiter.release(address, warning).await;
                undelivered += 1;
                continue;
            }

            if report.failed > 0 {
                warn!(
                    "⚠️ Alert {} for {} reached {}/{} channels",
                    warning.id, address, report.delivered, report.delivered + report.failed
                );
            } else {
                debug!("🔔 Alert {} for {} sent: {} {}", warning.id, address, warning.severity, warning.kind);
            }

            self.metrics.record(
                MetricPoint::new(RISK_ALERTS)
                    .tag("address", address)
                    .tag("type", warning.kind.as_str())
                    .tag("severity", warning.severity.as_str())
                    .field("message_length", warning.message.chars().count() as f64)
                    .field("timestamp", Utc::now().timestamp_millis() as f64),
            );
            sent += 1;
        }

        if sent == 0 {
            return Ok(if undelivered > 0 {
                DispatchOutcome::Undelivered { alerts: undelivered }
            } else {
                DispatchOutcome::Suppressed
            });
        }

        let budget_used = self.limiter.record_sent(address).await?;
        info!("🔔 Sent {} alert(s) for {} ({} batch(es) this hour)", sent, address, budget_used);

        Ok(DispatchOutcome::Sent { alerts: sent, budget_used })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::limiter::counter_key;
    use crate::config::AlertSettings;
    use crate::model::{Severity, WarningType};
    use crate::store::KvStore;
    use crate::testing::{FailingChannel, FailingStore, RecordingTimeSeries, harness};

    fn warning(kind: WarningType, severity: Severity) -> RiskWarning {
        RiskWarning::new(kind, severity, format!("{} {}", kind, severity), Utc::now())
    }

    #[tokio::test]
    async fn failing_channel_does_not_stop_delivery_or_persistence() {
        let h = harness(1);
        let warnings = vec![
            warning(WarningType::Liquidation, Severity::High),
            warning(WarningType::ImpermanentLoss, Severity::Medium),
        ];

        let outcome = h.dispatcher.dispatch(&warnings, "W1").await.unwrap();
        h.settle().await;

        assert_eq!(outcome, DispatchOutcome::Sent { alerts: 2, budget_used: 1 });
        for channel in &h.channels {
            assert_eq!(channel.sent().len(), 2);
        }
        assert_eq!(h.metrics.count(RISK_ALERTS), 2);

        let first = &h.metrics.points()[0];
        assert_eq!(first.tags["address"], "W1");
        assert_eq!(first.tags["type"], "LIQUIDATION");
        assert_eq!(first.tags["severity"], "HIGH");
        assert_eq!(first.fields["message_length"], "LIQUIDATION HIGH".len() as f64);
    }

    #[tokio::test]
    async fn preserves_warning_order() {
        let h = harness(0);
        let warnings = vec![
            warning(WarningType::Liquidation, Severity::High),
            warning(WarningType::Protocol, Severity::Medium),
        ];

        h.dispatcher.dispatch(&warnings, "W1").await.unwrap();

        let sent = h.channels[0].sent();
        assert!(sent[0].contains("Type: LIQUIDATION"));
        assert!(sent[1].contains("Type: PROTOCOL"));
    }

    #[tokio::test]
    async fn duplicates_are_suppressed_without_charging_budget() {
        let h = harness(0);
        let warnings = vec![warning(WarningType::Liquidation, Severity::High)];

        h.dispatcher.dispatch(&warnings, "W1").await.unwrap();
        let outcome = h.dispatcher.dispatch(&warnings, "W1").await.unwrap();
        h.settle().await;

        assert_eq!(outcome, DispatchOutcome::Suppressed);
        assert_eq!(h.channels[0].sent().len(), 1);
        assert_eq!(h.metrics.count(RISK_ALERTS), 1);
        assert_eq!(h.store.get(&counter_key("W1")).await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn rate_limited_address_has_no_side_effects() {
        let h = harness(0);
        for _ in 0..AlertSettings::default().max_alerts_per_hour {
            h.store.incr(&counter_key("W1"), std::time::Duration::from_secs(3600)).await.unwrap();
        }

        let outcome = h.dispatcher
            .dispatch(&[warning(WarningType::Liquidation, Severity::High)], "W1")
            .await
            .unwrap();
        h.settle().await;

        assert_eq!(outcome, DispatchOutcome::RateLimited);
        assert!(h.channels[0].sent().is_empty());
        assert_eq!(h.metrics.count(RISK_ALERTS), 0);
        assert_eq!(h.store.get("alert:W1:LIQUIDATION:HIGH").await.unwrap(), None);
    }

    #[tokio::test]
    async fn store_outage_propagates_and_sends_nothing() {
        let channel = Arc::new(crate::testing::RecordingChannel::new("only"));
        let metrics = Arc::new(RecordingTimeSeries::default());
        let recorder = MetricsRecorder::new(metrics.clone());
        let dispatcher = AlertDispatcher::new(
            AlertRateLimiter::new(Arc::new(FailingStore), &AlertSettings::default()),
            NotificationManager::new(vec![channel.clone() as Arc<dyn crate::alert::notify::NotificationChannel>]),
            recorder.clone(),
        );

        let result = dispatcher
            .dispatch(&[warning(WarningType::Liquidation, Severity::High)], "W1")
            .await;
        recorder.flush().await;

        assert!(matches!(result, Err(AlertError::RateLimiterStore(_))));
        assert!(channel.sent().is_empty());
        assert_eq!(metrics.count(RISK_ALERTS), 0);
    }

    #[tokio::test]
    async fn undelivered_alert_is_retried_and_not_charged() {
        let h = harness(0);
        let recorder = MetricsRecorder::new(h.metrics.clone());
        let dispatcher = AlertDispatcher::new(
            AlertRateLimiter::new(h.store.clone(), &AlertSettings::default()),
            NotificationManager::new(vec![
                Arc::new(FailingChannel) as Arc<dyn crate::alert::notify::NotificationChannel>,
                Arc::new(FailingChannel) as Arc<dyn crate::alert::notify::NotificationChannel>,
            ]),
            recorder.clone(),
        );
        let warnings = vec![warning(WarningType::Liquidation, Severity::High)];

        let first = dispatcher.dispatch(&warnings, "W1").await.unwrap();
        let second = dispatcher.dispatch(&warnings, "W1").await.unwrap();
        recorder.flush().await;

        assert_eq!(first, DispatchOutcome::Undelivered { alerts: 1 });
        assert_eq!(second, DispatchOutcome::Undelivered { alerts: 1 });
        assert_eq!(h.store.get("alert:W1:LIQUIDATION:HIGH").await.unwrap(), None);
        assert_eq!(h.store.get(&counter_key("W1")).await.unwrap(), None);
        assert_eq!(h.metrics.count(RISK_ALERTS), 0);
    }

    #[tokio::test]
    async fn no_channels_configured_still_charges_budget() {
        let h = harness(0);
        let dispatcher = AlertDispatcher::new(
            AlertRateLimiter::new(h.store.clone(), &AlertSettings::default()),
            NotificationManager::new(vec![]),
            h.recorder.clone(),
        );

        let outcome = dispatcher
            .dispatch(&[warning(WarningType::Liquidation, Severity::High)], "W1")
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Sent { alerts: 1, budget_used: 1 });
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let h = harness(0);
        assert_eq!(h.dispatcher.dispatch(&[], "W1").await.unwrap(), DispatchOutcome::Suppressed);
        assert_eq!(h.store.get(&counter_key("W1")).await.unwrap(), None);
    }
}
