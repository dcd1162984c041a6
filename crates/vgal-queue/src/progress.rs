//! Client notifications via Redis Pub/Sub.

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;

use vgal_models::Notification;

use crate::error::QueueResult;

/// Destination of per-user notifications.
///
/// Delivery is best-effort: callers log failures and carry on.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, user_id: &str, notification: &Notification) -> QueueResult<()>;
}

/// Message published on a user's channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    /// `video_progress`, `video_completed` or `video_failed`
    pub event: String,
    pub data: Notification,
}

impl NotificationEnvelope {
    pub fn new(notification: &Notification) -> Self {
        Self {
            event: notification.event_name().to_string(),
            data: notification.clone(),
        }
    }
}

/// Channel for publishing/subscribing to notifications.
pub struct ProgressChannel {
    client: redis::Client,
}

impl ProgressChannel {
    /// Create a new progress channel.
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Get the channel name for a user.
    pub fn channel_name(user_id: &str) -> String {
        format!("vgal:notifications:{}", user_id)
    }

    /// Subscribe to a user's notifications.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub async fn subscribe(
        &self,
        user_id: &str,
    ) -> QueueResult<
        std::pin::Pin<Box<dyn futures_util::Stream<Item = NotificationEnvelope> + Send>>,
    > {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(Self::channel_name(user_id)).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl NotificationSink for ProgressChannel {
    async fn publish(&self, user_id: &str, notification: &Notification) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(user_id);
        let payload = serde_json::to_string(&NotificationEnvelope::new(notification))?;

        debug!(
            video_id = %notification.video_id(),
            event = notification.event_name(),
            "Publishing notification to {}",
            channel
        );
        conn.publish::<_, _, ()>(channel, payload).await?;

        Ok(())
    }
}
