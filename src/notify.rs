//! Notification dispatch
//!
//! Transport is an external collaborator behind the [`Notify`] trait. The
//! engines only ever call [`dispatch_all`], which isolates failures per
//! channel: one channel failing never blocks the others and never rolls
//! back the state transition that triggered the send.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    InApp,
    Email,
    Pager,
    Sms,
    Webhook,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::InApp => "in_app",
            Channel::Email => "email",
            Channel::Pager => "pager",
            Channel::Sms => "sms",
            Channel::Webhook => "webhook",
        }
    }
}

/// Outcome of one delivery attempt, appended to the owning record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub channel: Channel,
    pub ok: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// Notification transport collaborator.
#[async_trait]
pub trait Notify: Send + Sync {
    async fn send(
        &self,
        channel: Channel,
        recipients: &[String],
        template: &str,
        data: &serde_json::Value,
    ) -> anyhow::Result<String>;
}

/// Fire-and-forget dispatch across channels with per-channel isolation.
pub async fn dispatch_all(
    notifier: &Arc<dyn Notify>,
    channels: &[Channel],
    recipients: &[String],
    template: &str,
    data: &serde_json::Value,
) -> Vec<DeliveryRecord> {
    let mut records = Vec::with_capacity(channels.len());
    for &channel in channels {
        match notifier.send(channel, recipients, template, data).await {
            Ok(message_id) => {
                tracing::debug!(channel = channel.as_str(), template, "notification sent");
                records.push(DeliveryRecord {
                    channel,
                    ok: true,
                    message_id: Some(message_id),
                    error: None,
                    sent_at: Utc::now(),
                });
            }
            Err(err) => {
                // Recorded, never propagated
                tracing::warn!(
                    channel = channel.as_str(),
                    template,
                    error = %err,
                    "notification delivery failed"
                );
                records.push(DeliveryRecord {
                    channel,
                    ok: false,
                    message_id: None,
                    error: Some(err.to_string()),
                    sent_at: Utc::now(),
                });
            }
        }
    }
    records
}

/// Default transport: logs every send and, when a sink URL is configured,
/// forwards the payload there as JSON. Real email/SMS/paging gateways plug
/// in behind the same trait.
pub struct SinkNotifier {
    client: reqwest::Client,
    sink_url: Option<String>,
}

impl SinkNotifier {
    pub fn new(sink_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            sink_url,
        }
    }
}

#[async_trait]
impl Notify for SinkNotifier {
    async fn send(
        &self,
        channel: Channel,
        recipients: &[String],
        template: &str,
        data: &serde_json::Value,
    ) -> anyhow::Result<String> {
        let message_id = uuid::Uuid::new_v4().to_string();

        if let Some(url) = &self.sink_url {
            let payload = serde_json::json!({
                "message_id": message_id,
                "channel": channel.as_str(),
                "recipients": recipients,
                "template": template,
                "data": data,
            });
            self.client
                .post(url)
                .json(&payload)
                .send()
                .await?
                .error_for_status()?;
        } else {
            tracing::info!(
                channel = channel.as_str(),
                template,
                recipients = recipients.len(),
                "notification (no sink configured)"
            );
        }

        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakyNotifier;

    #[async_trait]
    impl Notify for FlakyNotifier {
        async fn send(
            &self,
            channel: Channel,
            _recipients: &[String],
            _template: &str,
            _data: &serde_json::Value,
        ) -> anyhow::Result<String> {
            match channel {
                Channel::Email => Err(anyhow::anyhow!("smtp unreachable")),
                _ => Ok("msg-1".to_string()),
            }
        }
    }

    #[tokio::test]
    async fn one_channel_failing_does_not_block_the_others() {
        let notifier: Arc<dyn Notify> = Arc::new(FlakyNotifier);
        let records = dispatch_all(
            &notifier,
            &[Channel::InApp, Channel::Email, Channel::Pager],
            &["ops@example.com".to_string()],
            "alert_created",
            &serde_json::json!({}),
        )
        .await;

        assert_eq!(records.len(), 3);
        assert!(records[0].ok);
        assert!(!records[1].ok);
        assert!(records[1].error.as_deref().unwrap().contains("smtp"));
        assert!(records[2].ok);
    }
}
