use anyhow::{Context, Result, anyhow};
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::alert::{self, AlertDispatcher, DispatchOutcome};
use crate::api::{HealthSource, ProtocolRegistry};
use crate::config::{Config, RiskThresholds};
use crate::error::AlertError;
use crate::metrics::{self, ProtocolHealthEvaluator, RiskScorer};
use crate::model::*;
use crate::store::{KvStore, MetricPoint, MetricsRecorder, PROTOCOL_ERRORS};

pub const HEALTH_CACHE_KEY: &str = "protocol:health:metrics";

pub fn positions_cache_key(address: &str) -> String {
    format!("positions:{}", address)
}

/// The risk pipeline as seen by callers: score positions, report protocol
/// health and raise alerts.
pub struct RiskMonitor {
    registry: ProtocolRegistry,
    health_sources: Vec<Arc<dyn HealthSource>>,
    scorer: RiskScorer,
    thresholds: RiskThresholds,
    dispatcher: Arc<AlertDispatcher>,
    evaluator: ProtocolHealthEvaluator,
    cache: Arc<dyn KvStore>,
    metrics: MetricsRecorder,
    health_cache_ttl: Duration,
    positions_cache_ttl: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleSummary {
    pub addresses: usize,
    pub positions: usize,
    pub warnings: usize,
    pub protocols: usize,
}

impl RiskMonitor {
    pub fn new(
        registry: ProtocolRegistry,
        health_sources: Vec<Arc<dyn HealthSource>>,
        dispatcher: Arc<AlertDispatcher>,
        cache: Arc<dyn KvStore>,
        metrics: MetricsRecorder,
        config: &Config,
    ) -> Self {
        Self {
            registry,
            health_sources,
            scorer: RiskScorer::new(config.protocols.risk_profiles.clone()),
            thresholds: config.risk_thresholds,
            evaluator: ProtocolHealthEvaluator::new(dispatcher.clone(), &config.alerts),
            dispatcher,
            cache,
            metrics,
            health_cache_ttl: Duration::from_secs(config.monitor.protocol_health_cache_secs),
            positions_cache_ttl: Duration::from_secs(config.monitor.positions_cache_secs),
        }
    }

    /// Scores every position held by `address` and dispatches the resulting
    /// warnings as a single batch. Protocols that fail to respond are
    /// skipped.
    pub async fn monitor_position(&self, address: &str) -> Result<Vec<PositionRisk>> {
        let positions = self.get_all_positions(address).await;
        let tvl_changes = self.cached_tvl_changes().await;

        let mut risks = Vec::with_capacity(positions.len());
        for position in &positions {
            let score = self.scorer.score(position);
            let tvl_change = tvl_changes.get(&position.protocol).copied();
            let warnings = alert::evaluate_with_tvl(&score, tvl_change, &self.thresholds);
            let risk = self.scorer.position_risk(position, score, warnings);

            debug!(
                "🧮 {} {} risk: overall {} (liq {}, il {}, protocol {}), {} warning(s)",
                risk.protocol,
                risk.position_id,
                risk.risk_score.overall,
                risk.risk_score.liquidation,
                risk.risk_score.impermanent_loss,
                risk.risk_score.protocol,
                risk.warnings.len()
            );

            self.metrics.record(metrics::position_risk_point(&risk));
            risks.push(risk);
        }

        let mut batch: Vec<RiskWarning> = risks.iter().flat_map(|r| r.warnings.iter().cloned()).collect();
        batch.sort_by_key(|w| w.kind);

        if !batch.is_empty() {
            self.trigger_alerts(&batch, address)
                .await
                .with_context(|| format!("dispatching alerts for {}", address))?;
        }

        Ok(risks)
    }

    pub async fn trigger_alerts(&self, warnings: &[RiskWarning], address: &str) -> Result<DispatchOutcome, AlertError> {
        self.dispatcher.dispatch(warnings, address).await
    }

    /// Protocol health for every source, served from cache for the configured
    /// TTL. Sources that fail are left out, and a result missing any source
    /// is not cached.
    pub async fn get_protocol_health(&self) -> Result<Vec<ProtocolHealthMetrics>> {
        if let Some(cached) = self.cache_get::<Vec<ProtocolHealthMetrics>>(HEALTH_CACHE_KEY).await {
            debug!("📦 Serving protocol health from cache");
            return Ok(cached);
        }

        let fetches = self.health_sources.iter().map(|source| async move {
            (source.name().to_string(), source.get_raw_metrics().await)
        });

        let mut health_metrics = Vec::new();
        let mut failed = 0;
        for (name, result) in join_all(fetches).await {
            let raw = match result {
                Ok(raw) => raw,
                Err(e) => {
                    error!("❌ Error fetching {} protocol metrics: {:#}", name, e);
                    self.record_protocol_error(&name);
                    failed += 1;
                    continue;
                }
            };

            let health = ProtocolHealthEvaluator::evaluate(&raw);
            let risk = match self.evaluator.check(&health).await {
                Ok(risk) => risk,
                Err(e) => {
                    error!("❌ Error triggering {} protocol health alert: {}", name, e);
                    self.record_protocol_error(&name);
                    ProtocolHealthEvaluator::risk(&health)
                }
            };

            info!(
                "🏥 {} health: TVL ${:.1}M, 24h TVL {:+.1}%, risk {:.1}",
                health.name,
                health.tvl / 1_000_000.0,
                health.tvl_change_24h,
                risk
            );

            self.metrics.record(metrics::protocol_health_point(&health, risk));
            health_metrics.push(health);
        }

        if failed == 0 {
            self.cache_set(HEALTH_CACHE_KEY, &health_metrics, self.health_cache_ttl).await;
        }

        Ok(health_metrics)
    }

    /// One monitoring pass: refresh protocol health, then every address.
    /// All addresses are attempted before the first failure is returned.
    pub async fn run_cycle(&self, addresses: &[String]) -> Result<CycleSummary> {
        let health = self.get_protocol_health().await?;

        let results = join_all(addresses.iter().map(|address| self.monitor_position(address))).await;

        let mut summary = CycleSummary {
            addresses: addresses.len(),
            protocols: health.len(),
            ..Default::default()
        };
        let mut first_error = None;

        for (address, result) in addresses.iter().zip(results) {
            match result {
                Ok(risks) => {
                    summary.positions += risks.len();
                    summary.warnings += risks.iter().map(|r| r.warnings.len()).sum::<usize>();
                }
                Err(e) => {
                    error!("❌ Monitoring {} failed: {:#}", address, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    async fn get_all_positions(&self, address: &str) -> Vec<ProtocolPosition> {
        let key = positions_cache_key(address);
        if let Some(cached) = self.cache_get::<Vec<ProtocolPosition>>(&key).await {
            debug!("📦 Serving {} positions for {} from cache", cached.len(), address);
            return cached;
        }

        let fetch = self.registry.get_all_positions(address).await;

        for (protocol, _) in &fetch.failures {
            self.record_protocol_error(protocol);
        }
        for position in &fetch.positions {
            self.metrics.record(metrics::protocol_position_point(position));
        }

        if fetch.failures.is_empty() {
            self.cache_set(&key, &fetch.positions, self.positions_cache_ttl).await;
        }

        fetch.positions
    }

    async fn cached_tvl_changes(&self) -> HashMap<String, f64> {
        self.cache_get::<Vec<ProtocolHealthMetrics>>(HEALTH_CACHE_KEY)
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|h| (h.name, h.tvl_change_24h))
            .collect()
    }

    fn record_protocol_error(&self, protocol: &str) {
        self.metrics.record(
            MetricPoint::new(PROTOCOL_ERRORS)
                .tag("protocol", protocol)
                .field("count", 1.0)
                .at(chrono::Utc::now()),
        );
    }

    async fn cache_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("⚠️ Ignoring malformed cache entry {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("⚠️ Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    async fn cache_set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }

        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("⚠️ Could not encode cache entry {}: {}", key, e);
                return;
            }
        };

        if let Err(e) = self.cache.set(key, &raw, ttl).await {
            warn!("⚠️ Cache write failed for {}: {}", key, e);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Backoff,
}

/// Periodic driver for [`RiskMonitor::run_cycle`]. Cycles never overlap: the
/// next one is scheduled only after the previous one settles.
pub struct MonitoringLoop {
    monitor: Arc<RiskMonitor>,
    addresses: Arc<Vec<String>>,
    poll_interval: Duration,
    backoff_interval: Duration,
}

impl MonitoringLoop {
    pub fn new(monitor: Arc<RiskMonitor>, config: &Config) -> Self {
        Self {
            monitor,
            addresses: Arc::new(config.monitored_addresses.clone()),
            poll_interval: config.monitor.poll_interval(),
            backoff_interval: config.monitor.backoff_interval(),
        }
    }

    pub fn delay_for(&self, state: LoopState) -> Duration {
        match state {
            LoopState::Running => self.poll_interval,
            LoopState::Backoff => self.backoff_interval,
        }
    }

    /// Runs one cycle to completion. Errors and panics inside the cycle are
    /// logged, recorded and turned into [`LoopState::Backoff`].
    pub async fn tick(&self, cycle: u64) -> LoopState {
        debug!("📊 Starting monitoring cycle #{}", cycle);

        let monitor = self.monitor.clone();
        let addresses = self.addresses.clone();
        let outcome = tokio::spawn(async move { monitor.run_cycle(&addresses).await })
            .await
            .unwrap_or_else(|join_error| Err(anyhow!("monitoring cycle panicked: {}", join_error)));

        match outcome {
            Ok(summary) => {
                info!(
                    "✅ Cycle #{} complete: {} address(es), {} position(s), {} warning(s), {} protocol(s)",
                    cycle, summary.addresses, summary.positions, summary.warnings, summary.protocols
                );
                LoopState::Running
            }
            Err(e) => {
                error!("❌ Cycle #{} failed: {:#}", cycle, e);
                self.monitor.metrics().record_error("cycle", &e);
                LoopState::Backoff
            }
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "📡 Starting monitoring loop for {} address(es) (interval: {:?}, backoff: {:?})",
            self.addresses.len(),
            self.poll_interval,
            self.backoff_interval
        );

        let mut state = LoopState::Running;
        let mut cycle = 0u64;

        loop {
            if *shutdown.borrow() {
                break;
            }

            cycle += 1;
            let next = self.tick(cycle).await;

            match (state, next) {
                (LoopState::Running, LoopState::Backoff) => {
                    warn!("⚠️ Entering backoff, retrying in {:?}", self.backoff_interval)
                }
                (LoopState::Backoff, LoopState::Running) => info!("🔄 Recovered from backoff"),
                _ => {}
            }
            state = next;

            tokio::select! {
                _ = tokio::time::sleep(self.delay_for(state)) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("👋 Monitoring loop stopped after {} cycle(s)", cycle);
    }
}
