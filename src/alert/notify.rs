use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures_util::future::join_all;
use log::{debug, error, warn};
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::config::NotificationSettings;
use crate::model::RiskWarning;

const BOT_USERNAME: &str = "DeFi Sentinel";

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, message: &str) -> Result<()>;
}

pub struct DiscordChannel {
    client: Client,
    webhook_url: String,
}

impl DiscordChannel {
    pub fn new(client: Client, webhook_url: String) -> Self {
        Self { client, webhook_url }
    }
}

#[async_trait]
impl NotificationChannel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send(&self, message: &str) -> Result<()> {
        let response = self.client
            .post(&self.webhook_url)
            .json(&json!({ "content": message, "username": BOT_USERNAME }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Discord webhook returned {}", response.status()));
        }
        Ok(())
    }
}

pub struct TelegramChannel {
    client: Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramChannel {
    pub fn new(client: Client, bot_token: String, chat_id: String) -> Self {
        Self { client, bot_token, chat_id }
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, message: &str) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let response = self.client
            .post(url)
            .json(&json!({ "chat_id": self.chat_id, "text": message, "parse_mode": "HTML" }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Telegram API returned {}", response.status()));
        }
        Ok(())
    }
}

/// Fans a message out to every configured channel concurrently.
pub struct NotificationManager {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FanOutReport {
    pub delivered: usize,
    pub failed: usize,
}

impl NotificationManager {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }

    pub fn from_settings(settings: &NotificationSettings, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();

        if let Some(discord) = &settings.discord {
            channels.push(Arc::new(DiscordChannel::new(client.clone(), discord.webhook_url.clone())));
        }

        if let Some(telegram) = &settings.telegram {
            if !telegram.bot_token.is_empty() && !telegram.chat_id.is_empty() {
                channels.push(Arc::new(TelegramChannel::new(
                    client.clone(),
                    telegram.bot_token.clone(),
                    telegram.chat_id.clone(),
                )));
            }
        }

        if channels.is_empty() {
            warn!("⚠️ No notification channels configured, alerts will only be logged and stored");
        }

        Ok(Self::new(channels))
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Never fails: each channel's error is logged and counted.
    pub async fn send_all(&self, message: &str) -> FanOutReport {
        let sends = self.channels.iter().map(|channel| async move {
            match channel.send(message).await {
                Ok(()) => {
                    debug!("📨 Delivered alert via {}", channel.name());
                    true
                }
                Err(e) => {
                    error!("❌ {} notification error: {:#}", channel.name(), e);
                    false
                }
            }
        });

        let results = join_all(sends).await;
        let delivered = results.iter().filter(|ok| **ok).count();

        FanOutReport { delivered, failed: results.len() - delivered }
    }
}

pub fn format_message(address: &str, warning: &RiskWarning) -> String {
    format!(
        "{} Risk Alert for {}\n\nType: {}\nSeverity: {}\nMessage: {}\nTime: {}",
        warning.severity.glyph(),
        address,
        warning.kind,
        warning.severity,
        warning.message,
        warning.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}
