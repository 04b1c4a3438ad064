use anyhow::Result;
use figment::{Figment, providers::{Format, Toml, Env}};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "sentinel.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub monitored_addresses: Vec<String>,
    pub monitor: MonitorSettings,
    pub risk_thresholds: RiskThresholds,
    pub alerts: AlertSettings,
    pub notifications: NotificationSettings,
    pub timeseries: Option<InfluxSettings>,
    pub protocols: ProtocolSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub poll_interval_secs: u64,
    pub backoff_interval_secs: u64,
    pub shutdown_grace_secs: u64,
    pub protocol_health_cache_secs: u64,
    pub positions_cache_secs: u64,
}

/// Percent thresholds compared against the matching [`crate::model::RiskScore`]
/// dimension. TVL thresholds are percent drop over 24h.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub liquidation_warning: f64,
    pub liquidation_critical: f64,
    pub il_warning: f64,
    pub il_critical: f64,
    pub protocol_warning: f64,
    pub protocol_critical: f64,
    pub tvl_change_warning: f64,
    pub tvl_change_critical: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub max_alerts_per_hour: u32,
    pub dedup_window_secs: u64,
    pub protocol_alert_threshold: f64,
    pub protocol_critical_threshold: f64,
    pub system_address: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub discord: Option<DiscordSettings>,
    pub telegram: Option<TelegramSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordSettings {
    pub webhook_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxSettings {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    pub solana_rpc_url: String,
    pub marinade_api_url: String,
    pub kamino_api_url: String,
    pub kamino_env: String,
    pub request_timeout_secs: u64,
    /// Keyed by protocol name as reported by its adapter.
    pub risk_profiles: BTreeMap<String, RiskProfile>,
}

/// Static risk characteristics of a protocol, fed to the scorer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    /// Baseline protocol risk, 0-100.
    pub base_risk: f64,
    /// Expected impermanent loss in percent for positions in this protocol.
    pub il_exposure_pct: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            monitored_addresses: vec![],
            monitor: MonitorSettings::default(),
            risk_thresholds: RiskThresholds::default(),
            alerts: AlertSettings::default(),
            notifications: NotificationSettings::default(),
            timeseries: None,
            protocols: ProtocolSettings::default(),
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            backoff_interval_secs: 30,
            shutdown_grace_secs: 10,
            protocol_health_cache_secs: 300,
            positions_cache_secs: 60,
        }
    }
}

impl MonitorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn backoff_interval(&self) -> Duration {
        Duration::from_secs(self.backoff_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            liquidation_warning: 80.0,
            liquidation_critical: 90.0,
            il_warning: 5.0,
            il_critical: 10.0,
            protocol_warning: 70.0,
            protocol_critical: 90.0,
            tvl_change_warning: 20.0,
            tvl_change_critical: 40.0,
        }
    }
}

impl RiskThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pairs = [
            ("liquidation", self.liquidation_warning, self.liquidation_critical),
            ("il", self.il_warning, self.il_critical),
            ("protocol", self.protocol_warning, self.protocol_critical),
            ("tvl_change", self.tvl_change_warning, self.tvl_change_critical),
        ];

        for (dimension, warning, critical) in pairs {
            if !(warning.is_finite() && critical.is_finite()) || warning >= critical {
                return Err(ConfigError::ThresholdOrder { dimension, warning, critical });
            }
        }

        Ok(())
    }
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            max_alerts_per_hour: 10,
            dedup_window_secs: 3600,
            protocol_alert_threshold: 70.0,
            protocol_critical_threshold: 90.0,
            system_address: "system".to_string(),
        }
    }
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        let mut risk_profiles = BTreeMap::new();
        risk_profiles.insert("Marinade".to_string(), RiskProfile { base_risk: 20.0, il_exposure_pct: 0.0 });
        risk_profiles.insert("Kamino".to_string(), RiskProfile { base_risk: 35.0, il_exposure_pct: 4.0 });

        Self {
            solana_rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            marinade_api_url: "https://api.marinade.finance".to_string(),
            kamino_api_url: "https://api.kamino.finance".to_string(),
            kamino_env: "mainnet-beta".to_string(),
            request_timeout_secs: 15,
            risk_profiles,
        }
    }
}

pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    let config_file = config_path.unwrap_or(DEFAULT_CONFIG_PATH);

    let config: Config = Figment::new()
        .merge(Toml::file(config_file))
        .merge(Env::prefixed("SENTINEL_").split("__"))
        .extract()?;

    validate_config(&config)?;

    Ok(config)
}

pub fn generate_sample_config(path: &str) -> Result<()> {
    let mut config = Config::default();
    config.monitored_addresses = vec!["<wallet address>".to_string()];
    config.notifications.discord = Some(DiscordSettings {
        webhook_url: "https://discord.com/api/webhooks/<id>/<token>".to_string(),
    });

    let toml_content = toml::to_string_pretty(&config)?;
    fs::write(path, toml_content)?;

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    config.risk_thresholds.validate()?;

    if config.monitored_addresses.iter().any(|a| a.trim().is_empty()) {
        return Err(ConfigError::Invalid("monitored_addresses must not contain empty entries".into()));
    }

    if config.monitor.poll_interval_secs == 0 {
        return Err(ConfigError::Invalid("poll_interval_secs must be at least 1".into()));
    }

    if config.monitor.backoff_interval_secs > config.monitor.poll_interval_secs {
        return Err(ConfigError::Invalid(
            "backoff_interval_secs must not exceed poll_interval_secs".into(),
        ));
    }

    if config.alerts.max_alerts_per_hour == 0 {
        return Err(ConfigError::Invalid("max_alerts_per_hour must be at least 1".into()));
    }

    if config.alerts.protocol_alert_threshold >= config.alerts.protocol_critical_threshold {
        return Err(ConfigError::Invalid(
            "protocol_alert_threshold must be below protocol_critical_threshold".into(),
        ));
    }

    if let Some(discord) = &config.notifications.discord {
        Url::parse(&discord.webhook_url)
            .map_err(|e| ConfigError::Invalid(format!("discord webhook_url: {}", e)))?;
    }

    if let Some(influx) = &config.timeseries {
        Url::parse(&influx.url)
            .map_err(|e| ConfigError::Invalid(format!("timeseries url: {}", e)))?;
    }

    Ok(())
}
