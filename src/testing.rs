//! Test doubles shared across module tests.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::alert::notify::NotificationChannel;
use crate::alert::{AlertDispatcher, AlertRateLimiter, NotificationManager};
use crate::config::AlertSettings;
use crate::error::StoreError;
use crate::store::{KvStore, MemoryStore, MetricPoint, MetricsRecorder, TimeSeriesStore};

pub struct RecordingChannel {
    name: String,
    sent: Mutex<Vec<String>>,
}

impl RecordingChannel {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), sent: Mutex::new(Vec::new()) }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &str) -> Result<()> {
        self.sent.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

pub struct FailingChannel;

#[async_trait]
impl NotificationChannel for FailingChannel {
    fn name(&self) -> &str {
        "failing"
    }

    async fn send(&self, _message: &str) -> Result<()> {
        Err(anyhow!("webhook unreachable"))
    }
}

#[derive(Default)]
pub struct RecordingTimeSeries {
    points: Mutex<Vec<MetricPoint>>,
}

impl RecordingTimeSeries {
    pub fn points(&self) -> Vec<MetricPoint> {
        self.points.lock().unwrap().clone()
    }

    pub fn count(&self, measurement: &str) -> usize {
        self.points.lock().unwrap().iter().filter(|p| p.measurement == measurement).count()
    }
}

#[async_trait]
impl TimeSeriesStore for RecordingTimeSeries {
    async fn write_metric(&self, point: &MetricPoint) -> Result<(), StoreError> {
        self.points.lock().unwrap().push(point.clone());
        Ok(())
    }
}

/// Key/value store whose backend is permanently unreachable.
pub struct FailingStore;

#[async_trait]
impl KvStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn set_if_absent(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn incr(&self, _key: &str, _ttl: Duration) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub metrics: Arc<RecordingTimeSeries>,
    /// The healthy channels; failing ones are wired in but not listed.
    pub channels: Vec<Arc<RecordingChannel>>,
    pub dispatcher: Arc<AlertDispatcher>,
    /// Writes into `metrics`; shared by everything the harness wires up.
    pub recorder: MetricsRecorder,
}

impl Harness {
    /// Waits for queued metric points to land in `metrics`.
    pub async fn settle(&self) {
        self.recorder.flush().await;
    }
}

/// A dispatcher over an in-memory store with two recording channels plus
/// `failing` channels that always error.
pub fn harness(failing: usize) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let metrics = Arc::new(RecordingTimeSeries::default());
    let channels = vec![
        Arc::new(RecordingChannel::new("primary")),
        Arc::new(RecordingChannel::new("secondary")),
    ];

    let mut wired: Vec<Arc<dyn NotificationChannel>> = channels
        .iter()
        .map(|c| c.clone() as Arc<dyn NotificationChannel>)
        .collect();
    for _ in 0..failing {
        wired.push(Arc::new(FailingChannel));
    }

    let recorder = MetricsRecorder::new(metrics.clone());
    let dispatcher = Arc::new(AlertDispatcher::new(
        AlertRateLimiter::new(store.clone(), &AlertSettings::default()),
        NotificationManager::new(wired),
        recorder.clone(),
    ));

    Harness { store, metrics, channels, dispatcher, recorder }
}
