use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

mod alert;
mod api;
mod config;
mod error;
mod metrics;
mod model;
mod monitor;
mod store;
#[cfg(test)]
mod testing;

use alert::{AlertDispatcher, AlertRateLimiter, NotificationManager};
use api::{HealthSource, KaminoAdapter, KaminoHealthSource, MarinadeAdapter, ProtocolRegistry};
use config::Config;
use monitor::{MonitoringLoop, RiskMonitor};
use store::history::TVL_BASELINE_WINDOW;
use store::{InfluxStore, MemoryStore, MetricPoint, MetricsRecorder, NullTimeSeries, SERVER_EVENTS, TimeSeriesStore, TvlHistory};

#[derive(Parser)]
#[command(name = "solana-sentinel")]
#[command(about = "Risk monitoring and alerting for Solana DeFi positions")]
struct Args {
    #[arg(long)]
    generate_config: bool,

    #[arg(short, long)]
    config: Option<String>,

    /// Run a single monitoring cycle and exit
    #[arg(long)]
    once: bool,

    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    env_logger::Builder::from_default_env().filter_level(level).init();

    print_startup_banner();

    if args.generate_config {
        let path = args.config.as_deref().unwrap_or(config::DEFAULT_CONFIG_PATH);
        config::generate_sample_config(path)?;
        println!("✅ Sample configuration generated at {}", path);
        return Ok(());
    }

    let config = config::load_config(args.config.as_deref())?;

    if config.monitored_addresses.is_empty() {
        warn!("⚠️ No monitored addresses configured, only protocol health will be tracked");
    }

    run(config, args.once).await
}

pub fn print_startup_banner() {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                      SOLANA SENTINEL                         ║");
    println!("║                                                              ║");
    println!("║            DeFi Position Risk Monitoring & Alerts            ║");
    println!("║                                                              ║");
    println!("║     Scores: Liquidation | Impermanent Loss | Protocol        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

async fn run(config: Config, once: bool) -> Result<()> {
    let timeout = Duration::from_secs(config.protocols.request_timeout_secs);
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("building HTTP client")?;

    let cache = Arc::new(MemoryStore::new());
    let timeseries: Arc<dyn TimeSeriesStore> = match &config.timeseries {
        Some(settings) => {
            info!("📈 Writing metrics to InfluxDB at {}", settings.url);
            Arc::new(InfluxStore::new(settings, timeout)?)
        }
        None => {
            warn!("⚠️ No timeseries store configured, metrics will be discarded");
            Arc::new(NullTimeSeries)
        }
    };
    let recorder = MetricsRecorder::new(timeseries);

    let notifier = NotificationManager::from_settings(&config.notifications, timeout)?;
    info!("🔔 {} notification channel(s) configured", notifier.channel_count());

    let dispatcher = Arc::new(AlertDispatcher::new(
        AlertRateLimiter::new(cache.clone(), &config.alerts),
        notifier,
        recorder.clone(),
    ));

    let mut registry = ProtocolRegistry::new();
    registry.register(Arc::new(MarinadeAdapter::new(client.clone(), &config.protocols)));
    registry.register(Arc::new(KaminoAdapter::new(client.clone(), &config.protocols)));
    info!("🔌 Protocol adapters: {}", registry.names().join(", "));

    let health_sources: Vec<Arc<dyn HealthSource>> = vec![Arc::new(KaminoHealthSource::new(
        client,
        &config.protocols,
        TvlHistory::new(cache.clone(), TVL_BASELINE_WINDOW),
    ))];

    let monitor = Arc::new(RiskMonitor::new(
        registry,
        health_sources,
        dispatcher,
        cache.clone(),
        recorder.clone(),
        &config,
    ));
    let monitoring = MonitoringLoop::new(monitor, &config);

    if once {
        info!("🔂 Running a single monitoring cycle");
        let state = monitoring.tick(1).await;
        drain_metrics(&recorder, config.monitor.shutdown_grace()).await;
        return match state {
            monitor::LoopState::Running => Ok(()),
            monitor::LoopState::Backoff => Err(anyhow::anyhow!("monitoring cycle failed")),
        };
    }

    record_server_event(&recorder, "start");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let purge_cache = cache.clone();
    let purge_every = config.monitor.poll_interval();
    let mut purge_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(purge_every) => {
                    let purged = purge_cache.purge_expired().await;
                    if purged > 0 {
                        log::debug!("🧹 Purged {} expired cache entries", purged);
                    }
                }
                _ = purge_shutdown.changed() => break,
            }
        }
    });

    let handle = tokio::spawn(async move { monitoring.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await.context("listening for shutdown signal")?;
    info!("🛑 Shutdown requested, waiting for the current cycle to finish");

    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(config.monitor.shutdown_grace(), handle).await {
        Ok(Ok(())) => info!("✅ Monitoring loop drained"),
        Ok(Err(e)) => error!("❌ Monitoring loop task failed: {}", e),
        Err(_) => warn!(
            "⚠️ Monitoring loop did not stop within {:?}, exiting anyway",
            config.monitor.shutdown_grace()
        ),
    }

    record_server_event(&recorder, "shutdown");
    drain_metrics(&recorder, config.monitor.shutdown_grace()).await;
    info!("👋 Solana Sentinel stopped");

    Ok(())
}

fn record_server_event(recorder: &MetricsRecorder, event: &str) {
    recorder.record(MetricPoint::new(SERVER_EVENTS).tag("event", event).field("count", 1.0).at(Utc::now()));
}

async fn drain_metrics(recorder: &MetricsRecorder, grace: Duration) {
    if tokio::time::timeout(grace, recorder.flush()).await.is_err() {
        warn!("⚠️ Metrics writer did not drain within {:?}, pending points dropped", grace);
    }
}
