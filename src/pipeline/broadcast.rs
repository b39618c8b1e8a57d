//! In-process broadcast hub.
//!
//! Listeners attach to one channel and receive every frame published on it,
//! except frames that exclude their own socket.

use anyhow::{Error, Result};
use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{models::notification::PushEnvelope, pipeline::push::Broadcaster};

#[derive(Debug, Clone)]
pub struct BroadcastFrame {
    pub channel: String,
    pub event: String,
    pub envelope: PushEnvelope,
    pub except_socket: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LocalBroadcaster {
    sender: broadcast::Sender<BroadcastFrame>,
}

impl LocalBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Attaches a new connection, with a fresh socket id, to `channel`.
    pub fn listen(&self, channel: &str) -> Listener {
        Listener {
            socket_id: Uuid::new_v4().to_string(),
            channel: channel.to_string(),
            receiver: self.sender.subscribe(),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LocalBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Broadcaster for LocalBroadcaster {
    async fn broadcast(
        &self,
        channel: &str,
        event: &str,
        envelope: &PushEnvelope,
        except_socket: Option<&str>,
    ) -> Result<(), Error> {
        let frame = BroadcastFrame {
            channel: channel.to_string(),
            event: event.to_string(),
            envelope: envelope.clone(),
            except_socket: except_socket.map(String::from),
        };

        // No listeners is not a failure.
        if self.sender.send(frame).is_err() {
            debug!(channel, "No local listeners for broadcast");
        }

        Ok(())
    }
}

pub struct Listener {
    socket_id: String,
    channel: String,
    receiver: broadcast::Receiver<BroadcastFrame>,
}

impl Listener {
    pub fn socket_id(&self) -> &str {
        &self.socket_id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next frame for this listener, or `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<BroadcastFrame> {
        loop {
            match self.receiver.recv().await {
                Ok(frame) if self.accepts(&frame) => return Some(frame),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "Listener lagged behind broadcasts");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Listener::recv`].
    pub fn try_recv(&mut self) -> Option<BroadcastFrame> {
        loop {
            match self.receiver.try_recv() {
                Ok(frame) if self.accepts(&frame) => return Some(frame),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    fn accepts(&self, frame: &BroadcastFrame) -> bool {
        frame.channel == self.channel && frame.except_socket.as_deref() != Some(self.socket_id.as_str())
    }
}
