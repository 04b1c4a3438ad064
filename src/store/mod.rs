pub mod history;
pub mod influx;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::error::StoreError;

pub use history::TvlHistory;
pub use influx::InfluxStore;
pub use memory::MemoryStore;

pub const POSITION_RISKS: &str = "position_risks";
pub const PROTOCOL_HEALTH: &str = "protocol_health";
pub const PROTOCOL_POSITIONS: &str = "protocol_positions";
pub const RISK_ALERTS: &str = "risk_alerts";
pub const PROTOCOL_ERRORS: &str = "protocol_errors";
pub const SERVER_EVENTS: &str = "server_events";

/// Expiring key/value store. `incr` and `set_if_absent` must be atomic with
/// respect to concurrent callers on the same key.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Stores `value` only if `key` is absent or expired. Returns whether it
    /// was stored.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Increments the counter at `key`, creating it with `ttl` if absent.
    /// An existing counter keeps its original expiry.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    async fn write_metric(&self, point: &MetricPoint) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl MetricPoint {
    pub fn new(measurement: &str) -> Self {
        Self {
            measurement: measurement.to_string(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp: None,
        }
    }

    pub fn tag(mut self, key: &str, value: impl Into<String>) -> Self {
        self.tags.insert(key.to_string(), value.into());
        self
    }

    pub fn field(mut self, key: &str, value: f64) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Used when no time-series backend is configured.
pub struct NullTimeSeries;

#[async_trait]
impl TimeSeriesStore for NullTimeSeries {
    async fn write_metric(&self, point: &MetricPoint) -> Result<(), StoreError> {
        debug!("📉 Dropping {} point (no time-series store configured)", point.measurement);
        Ok(())
    }
}

enum WriterCommand {
    Write(MetricPoint),
    Flush(oneshot::Sender<()>),
}

const WRITER_QUEUE: usize = 1024;

/// Fire-and-forget front for the time-series store. Points are queued to a
/// background writer; write errors are logged and dropped, never returned to
/// the pipeline. A full queue drops the point.
#[derive(Clone)]
pub struct MetricsRecorder {
    tx: mpsc::Sender<WriterCommand>,
}

impl MetricsRecorder {
    /// Spawns the writer task, so this must run inside a tokio runtime.
    pub fn new(store: Arc<dyn TimeSeriesStore>) -> Self {
        let (tx, mut rx) = mpsc::channel(WRITER_QUEUE);

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    WriterCommand::Write(point) => {
                        if let Err(e) = store.write_metric(&point).await {
                            warn!("⚠️ Failed to write {} metric: {}", point.measurement, e);
                        }
                    }
                    WriterCommand::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
            debug!("📉 Metrics writer stopped");
        });

        Self { tx }
    }

    pub fn record(&self, point: MetricPoint) {
        let measurement = point.measurement.clone();
        if let Err(e) = self.tx.try_send(WriterCommand::Write(point)) {
            warn!("⚠️ Dropping {} metric: {}", measurement, e);
        }
    }

    pub fn record_error(&self, source: &str, error: &anyhow::Error) {
        debug!("📉 Recording error metric for {}: {:#}", source, error);
        self.record(
            MetricPoint::new(PROTOCOL_ERRORS)
                .tag("source", source)
                .field("count", 1.0)
                .at(Utc::now()),
        );
    }

    /// Waits until every point queued before this call has been written.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(WriterCommand::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowTimeSeries {
        delay: Duration,
        written: AtomicUsize,
    }

    #[async_trait]
    impl TimeSeriesStore for SlowTimeSeries {
        async fn write_metric(&self, _point: &MetricPoint) -> Result<(), StoreError> {
            tokio::time::sleep(self.delay).await;
            self.written.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct RejectingTimeSeries;

    #[async_trait]
    impl TimeSeriesStore for RejectingTimeSeries {
        async fn write_metric(&self, _point: &MetricPoint) -> Result<(), StoreError> {
            Err(StoreError::Rejected { status: 503, body: "unavailable".into() })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn record_does_not_wait_for_slow_backend() {
        let slow = Arc::new(SlowTimeSeries { delay: Duration::from_secs(15), written: AtomicUsize::new(0) });
        let recorder = MetricsRecorder::new(slow.clone());
        let start = tokio::time::Instant::now();

        for _ in 0..3 {
            recorder.record(MetricPoint::new(POSITION_RISKS).field("overall_risk", 42.0));
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(slow.written.load(Ordering::SeqCst), 0);

        recorder.flush().await;

        assert_eq!(slow.written.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_secs(45));
    }

    #[tokio::test]
    async fn write_failures_are_swallowed() {
        let recorder = MetricsRecorder::new(Arc::new(RejectingTimeSeries));

        recorder.record(MetricPoint::new(RISK_ALERTS).field("message_length", 10.0));
        recorder.record_error("cycle", &anyhow::anyhow!("boom"));
        recorder.flush().await;
    }
}
