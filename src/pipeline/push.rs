use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{Error, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::{task::JoinSet, time::timeout};
use tracing::{debug, error, info, warn};

use crate::models::notification::{
    DeliveryOrigin, NOTIFICATION_EVENT, NotificationIntent, PushEnvelope, UserType,
};

/// Real-time fan-out to the listeners of a named channel.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(
        &self,
        channel: &str,
        event: &str,
        envelope: &PushEnvelope,
        except_socket: Option<&str>,
    ) -> Result<(), Error>;
}

/// Out-of-process push provider (mobile/web push).
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send_push(
        &self,
        user_id: i64,
        user_type: UserType,
        content: &str,
        data: &Map<String, Value>,
    ) -> Result<(), Error>;
}

/// Delivers notifications to a user's private channel.
///
/// Transport failures stay in here: callers only ever see a `bool`.
pub struct PushChannel {
    broadcaster: Arc<dyn Broadcaster>,
    push_sender: Option<Arc<dyn PushSender>>,
    broadcast_timeout: Duration,
    push_timeout: Duration,
    pending: Mutex<JoinSet<()>>,
}

impl PushChannel {
    pub fn new(broadcaster: Arc<dyn Broadcaster>, broadcast_timeout: Duration) -> Self {
        Self {
            broadcaster,
            push_sender: None,
            broadcast_timeout,
            push_timeout: broadcast_timeout,
            pending: Mutex::new(JoinSet::new()),
        }
    }

    pub fn with_push_sender(mut self, push_sender: Arc<dyn PushSender>, push_timeout: Duration) -> Self {
        self.push_sender = Some(push_sender);
        self.push_timeout = push_timeout;
        self
    }

    /// Delivery from the background consumer: every listener receives it.
    pub async fn send(
        &self,
        user_id: i64,
        user_type: UserType,
        content: &str,
        metadata: Map<String, Value>,
    ) -> bool {
        let intent = NotificationIntent::new(user_id, user_type, content).with_metadata(metadata);
        self.deliver(&intent, &DeliveryOrigin::Background).await
    }

    /// Delivery from a live request: `socket_id` does not get its own broadcast.
    pub async fn send_to_others(
        &self,
        user_id: i64,
        user_type: UserType,
        content: &str,
        metadata: Map<String, Value>,
        socket_id: &str,
    ) -> bool {
        let intent = NotificationIntent::new(user_id, user_type, content).with_metadata(metadata);
        let origin = DeliveryOrigin::Request {
            socket_id: socket_id.to_string(),
        };
        self.deliver(&intent, &origin).await
    }

    pub async fn deliver(&self, intent: &NotificationIntent, origin: &DeliveryOrigin) -> bool {
        let envelope = PushEnvelope::from_intent(intent);

        let result = timeout(
            self.broadcast_timeout,
            self.broadcaster.broadcast(
                &envelope.channel,
                NOTIFICATION_EVENT,
                &envelope,
                origin.excluded_socket(),
            ),
        )
        .await;

        match result {
            Ok(Ok(())) => {
                debug!(
                    user_id = envelope.user_id,
                    user_type = %envelope.user_type,
                    channel = %envelope.channel,
                    "Notification broadcast"
                );
            }
            Ok(Err(e)) => {
                error!(
                    user_id = envelope.user_id,
                    user_type = %envelope.user_type,
                    error = %e,
                    "Failed to broadcast notification"
                );
                return false;
            }
            Err(_) => {
                error!(
                    user_id = envelope.user_id,
                    user_type = %envelope.user_type,
                    timeout_ms = self.broadcast_timeout.as_millis() as u64,
                    error = "broadcast timed out",
                    "Failed to broadcast notification"
                );
                return false;
            }
        }

        self.spawn_push(&envelope);

        true
    }

    fn spawn_push(&self, envelope: &PushEnvelope) {
        let Some(sender) = self.push_sender.clone() else {
            return;
        };

        let envelope = envelope.clone();
        let push_timeout = self.push_timeout;

        let task = async move {
            let result = timeout(
                push_timeout,
                sender.send_push(
                    envelope.user_id,
                    envelope.user_type,
                    &envelope.content,
                    &envelope.data,
                ),
            )
            .await;

            match result {
                Ok(Ok(())) => debug!(user_id = envelope.user_id, "External push sent"),
                Ok(Err(e)) => warn!(
                    user_id = envelope.user_id,
                    user_type = %envelope.user_type,
                    error = %e,
                    "External push failed"
                ),
                Err(_) => warn!(
                    user_id = envelope.user_id,
                    user_type = %envelope.user_type,
                    timeout_ms = push_timeout.as_millis() as u64,
                    "External push timed out"
                ),
            }
        };

        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        while pending.try_join_next().is_some() {}
        pending.spawn(task);
    }

    /// Waits up to `grace` for outstanding external pushes, then aborts the rest.
    pub async fn drain(&self, grace: Duration) {
        let mut pending = {
            let mut guard = self.pending.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::take(&mut *guard)
        };

        if pending.is_empty() {
            return;
        }

        info!(pending = pending.len(), "Draining external pushes");

        let drained = timeout(grace, async {
            while pending.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = pending.len(),
                "Grace period elapsed, aborting outstanding pushes"
            );
            pending.abort_all();
        }
    }
}

impl fmt::Debug for PushChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushChannel")
            .field("push_enabled", &self.push_sender.is_some())
            .field("broadcast_timeout", &self.broadcast_timeout)
            .field("push_timeout", &self.push_timeout)
            .finish()
    }
}
