/**
 * NOTIFICATION DISPATCH - Operator-triggered crew notifications
 *
 * ROLE:
 * Takes an operator's "send this to these people" request and hands it to
 * the external messaging gateway over MQTT. The kernel never talks to
 * WhatsApp/SMS/email itself.
 *
 * HOW IT WORKS:
 * 1. Validate: recipients present, message not blank, at least one channel
 * 2. Resolve recipients that are contact ids into their phone/email/whatsapp
 * 3. Publish one envelope on crowdwatch/notifications/dispatch@v1
 * 4. Record the outcome (latest 50 kept); delivery reports from the gateway
 *    update each recipient's status afterwards
 *
 * No retries: a failed publish is recorded as failed and reported to the caller.
 */

use crate::contacts::ContactBook;
use crate::models::Channels;
use crate::mqtt::topics;
use crate::state::{new_state, Shared};
use rumqttc::{AsyncClient, QoS};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

const HISTORY_LIMIT: usize = 50;

/// Outbound side of the bus.
pub trait Publisher: Clone + Send + Sync + 'static {
    fn publish_json(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

impl Publisher for AsyncClient {
    async fn publish_json(&self, topic: &str, payload: Vec<u8>) -> anyhow::Result<()> {
        self.publish(topic, QoS::AtLeastOnce, false, payload).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("At least one recipient is required")]
    NoRecipients,
    #[error("Message must not be empty")]
    EmptyMessage,
    #[error("No notification channel enabled")]
    NoChannels,
    #[error("Unknown notification: {0}")]
    UnknownNotification(String),
    #[error("Recipient '{recipient}' not part of notification {notification}")]
    UnknownRecipient { notification: String, recipient: String },
    #[error("Publish failed for notification {notification}: {reason}")]
    Publish { notification: String, reason: String },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    /// Contact ids or raw phone numbers / addresses
    pub recipients: Vec<String>,
    pub message: String,
    /// Overrides the channels from the notification settings
    #[serde(default)]
    pub channels: Option<Channels>,
    #[serde(default)]
    pub zone_id: Option<String>,
    #[serde(default)]
    pub insight_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRecipient {
    /// As given in the request
    pub recipient: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whatsapp: Option<String>,
}

/// Payload of crowdwatch/notifications/dispatch@v1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchEnvelope {
    pub id: String,
    pub recipients: Vec<ResolvedRecipient>,
    pub message: String,
    pub channels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Sent,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientStatus {
    pub recipient: String,
    pub status: DeliveryStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    pub recipients: Vec<RecipientStatus>,
    pub message: String,
    pub channels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight_id: Option<String>,
    pub status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Payload of crowdwatch/notifications/delivery@v1, sent back by the gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub notification_id: String,
    pub recipient: String,
    pub status: DeliveryStatus,
}

#[derive(Clone)]
pub struct NotificationDispatcher<P: Publisher> {
    publisher: P,
    contacts: Arc<ContactBook>,
    history: Shared<VecDeque<NotificationRecord>>,
}

impl<P: Publisher> NotificationDispatcher<P> {
    pub fn new(publisher: P, contacts: Arc<ContactBook>) -> Self {
        Self {
            publisher,
            contacts,
            history: new_state(VecDeque::new()),
        }
    }

    pub async fn dispatch(
        &self,
        request: DispatchRequest,
        default_channels: Channels,
    ) -> Result<NotificationRecord, DispatchError> {
        let recipients: Vec<String> = request
            .recipients
            .iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        if recipients.is_empty() {
            return Err(DispatchError::NoRecipients);
        }
        if request.message.trim().is_empty() {
            return Err(DispatchError::EmptyMessage);
        }
        let channels = request.channels.unwrap_or(default_channels);
        if !channels.any() {
            return Err(DispatchError::NoChannels);
        }

        let envelope = DispatchEnvelope {
            id: Uuid::new_v4().to_string(),
            recipients: recipients.iter().map(|r| self.resolve(r)).collect(),
            message: request.message,
            channels: channels.enabled().into_iter().map(String::from).collect(),
            zone_id: request.zone_id,
            insight_id: request.insight_id,
            timestamp: OffsetDateTime::now_utc(),
        };
        let payload = serde_json::to_vec(&envelope)?;
        let outcome = self.publisher.publish_json(topics::DISPATCH, payload).await;

        let mut record = NotificationRecord {
            id: envelope.id,
            recipients: recipients
                .into_iter()
                .map(|recipient| RecipientStatus { recipient, status: DeliveryStatus::Pending })
                .collect(),
            message: envelope.message,
            channels: envelope.channels,
            zone_id: envelope.zone_id,
            insight_id: envelope.insight_id,
            status: RecordStatus::Sent,
            error: None,
            timestamp: envelope.timestamp,
        };

        match outcome {
            Ok(()) => {
                info!(
                    "[dispatch] {} sent to {} recipient(s) via {}",
                    record.id,
                    record.recipients.len(),
                    record.channels.join(",")
                );
                self.remember(record.clone());
                Ok(record)
            }
            Err(e) => {
                error!("[dispatch] {} publish failed: {e:#}", record.id);
                record.status = RecordStatus::Failed;
                record.error = Some(e.to_string());
                for r in &mut record.recipients {
                    r.status = DeliveryStatus::Failed;
                }
                let notification = record.id.clone();
                self.remember(record);
                Err(DispatchError::Publish { notification, reason: e.to_string() })
            }
        }
    }

    fn resolve(&self, recipient: &str) -> ResolvedRecipient {
        match self.contacts.get(recipient) {
            Some(c) => ResolvedRecipient {
                recipient: recipient.to_string(),
                contact_id: Some(c.id),
                name: Some(c.name),
                phone: Some(c.phone),
                email: c.email,
                whatsapp: c.whatsapp,
            },
            None => ResolvedRecipient {
                recipient: recipient.to_string(),
                contact_id: None,
                name: None,
                phone: None,
                email: None,
                whatsapp: None,
            },
        }
    }

    fn remember(&self, record: NotificationRecord) {
        let mut history = self.history.lock();
        history.push_front(record);
        history.truncate(HISTORY_LIMIT);
    }

    /// Most recent first.
    pub fn history(&self) -> Vec<NotificationRecord> {
        self.history.lock().iter().cloned().collect()
    }

    /// Insights with a successful dispatch still in the history.
    pub fn notified_insights(&self) -> HashSet<String> {
        self.history
            .lock()
            .iter()
            .filter(|r| r.status == RecordStatus::Sent)
            .filter_map(|r| r.insight_id.clone())
            .collect()
    }

    pub fn apply_delivery(&self, report: &DeliveryReport) -> Result<(), DispatchError> {
        let mut history = self.history.lock();
        let record = history
            .iter_mut()
            .find(|r| r.id == report.notification_id)
            .ok_or_else(|| DispatchError::UnknownNotification(report.notification_id.clone()))?;
        let entry = record
            .recipients
            .iter_mut()
            .find(|r| r.recipient == report.recipient)
            .ok_or_else(|| DispatchError::UnknownRecipient {
                notification: report.notification_id.clone(),
                recipient: report.recipient.clone(),
            })?;
        entry.status = report.status;
        if report.status == DeliveryStatus::Failed {
            warn!("[dispatch] delivery to {} failed for {}", report.recipient, report.notification_id);
        }
        Ok(())
    }
}
