use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use std::time::Duration;

use super::{MetricPoint, TimeSeriesStore};
use crate::config::InfluxSettings;
use crate::error::StoreError;

/// InfluxDB v2 writer using the line protocol over HTTP.
pub struct InfluxStore {
    client: Client,
    write_url: String,
    token: String,
}

impl InfluxStore {
    pub fn new(settings: &InfluxSettings, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(timeout).build()?;

        let mut url = url::Url::parse(&settings.url)
            .map_err(|e| StoreError::Unavailable(format!("invalid influx url: {}", e)))?
            .join("api/v2/write")
            .map_err(|e| StoreError::Unavailable(format!("invalid influx url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("org", &settings.org)
            .append_pair("bucket", &settings.bucket)
            .append_pair("precision", "ns");

        Ok(Self {
            client,
            write_url: url.to_string(),
            token: settings.token.clone(),
        })
    }
}

#[async_trait]
impl TimeSeriesStore for InfluxStore {
    async fn write_metric(&self, point: &MetricPoint) -> Result<(), StoreError> {
        let line = to_line_protocol(point);
        debug!("📈 influx write: {}", line);

        let response = self.client
            .post(&self.write_url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(line)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Rejected { status: status.as_u16(), body });
        }

        Ok(())
    }
}

/// `measurement,tag=v field=1 <ns>`. Non-finite fields are skipped since
/// InfluxDB rejects them.
pub fn to_line_protocol(point: &MetricPoint) -> String {
    let mut line = escape(&point.measurement, &[',', ' ']);

    for (key, value) in &point.tags {
        if value.is_empty() {
            continue;
        }
        line.push(',');
        line.push_str(&escape(key, &[',', '=', ' ']));
        line.push('=');
        line.push_str(&escape(value, &[',', '=', ' ']));
    }

    let fields: Vec<String> = point.fields
        .iter()
        .filter(|(_, v)| v.is_finite())
        .map(|(k, v)| format!("{}={:?}", escape(k, &[',', '=', ' ']), v))
        .collect();

    line.push(' ');
    line.push_str(&fields.join(","));

    if let Some(nanos) = point.timestamp.and_then(|ts| ts.timestamp_nanos_opt()) {
        line.push(' ');
        line.push_str(&nanos.to_string());
    }

    line
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
