use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result};
use async_trait::async_trait;
use tokio::{
    sync::watch,
    time::{sleep, timeout},
};
use tracing::{debug, error, info, warn};

use crate::{
    models::{
        error::DispatchError,
        message::{BrokerMessage, ChannelEvent},
    },
    pipeline::registry::HandlerRegistry,
};

const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// A broker subscription the dispatcher pulls messages from.
#[async_trait]
pub trait MessageSource: Send {
    /// Subscribes to the broker-level wildcard patterns.
    async fn subscribe(&mut self, patterns: &[String]) -> Result<(), Error>;

    /// Next delivery; `None` once the subscription is closed.
    async fn next_message(&mut self) -> Result<Option<BrokerMessage>, Error>;

    /// Acknowledges or rejects a delivery after it was dispatched.
    async fn settle(&mut self, message: &BrokerMessage, outcome: &DispatchOutcome) -> Result<(), Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Handled { handler: String },
    Unrouted,
    Failed(DispatchError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub handled: u64,
    pub unrouted: u64,
    pub decode_failures: u64,
    pub handler_failures: u64,
}

impl DispatchStats {
    fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Handled { .. } => self.handled += 1,
            DispatchOutcome::Unrouted => self.unrouted += 1,
            DispatchOutcome::Failed(e) if e.is_decode() => self.decode_failures += 1,
            DispatchOutcome::Failed(_) => self.handler_failures += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.handled + self.unrouted + self.decode_failures + self.handler_failures
    }
}

/// Broker consumer: decodes each message, resolves its handler and runs it.
///
/// A failing, panicking or stalled handler is logged and the loop moves on.
pub struct EventDispatcher {
    registry: Arc<HandlerRegistry>,
    handler_timeout: Duration,
}

impl EventDispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, handler_timeout: Duration) -> Self {
        Self {
            registry,
            handler_timeout,
        }
    }

    /// Consumes `source` until shutdown is signalled or the subscription closes.
    ///
    /// The message in flight when shutdown arrives is always dispatched and
    /// settled before returning.
    pub async fn run<S>(
        &self,
        source: &mut S,
        patterns: &[String],
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<DispatchStats, Error>
    where
        S: MessageSource + ?Sized,
    {
        source.subscribe(patterns).await?;

        info!(
            patterns = ?patterns,
            bindings = self.registry.len(),
            "Event dispatcher started"
        );

        let mut stats = DispatchStats::default();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                next = source.next_message() => next,
            };

            let message = match next {
                Ok(Some(message)) => message,
                Ok(None) => {
                    warn!("Broker subscription closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to receive message from broker");
                    sleep(RECEIVE_ERROR_BACKOFF).await;
                    continue;
                }
            };

            let outcome = self.dispatch(&message.channel, &message.payload).await;
            stats.record(&outcome);

            if let Err(e) = source.settle(&message, &outcome).await {
                error!(channel = %message.channel, error = %e, "Failed to settle message");
            }
        }

        info!(
            handled = stats.handled,
            unrouted = stats.unrouted,
            decode_failures = stats.decode_failures,
            handler_failures = stats.handler_failures,
            "Event dispatcher stopped"
        );

        Ok(stats)
    }

    pub async fn dispatch(&self, channel: &str, raw: &[u8]) -> DispatchOutcome {
        match ChannelEvent::decode(channel, raw) {
            Ok(event) => self.dispatch_event(event).await,
            Err(e) => {
                warn!(channel, error = %e, "Dropping malformed message");
                DispatchOutcome::Failed(e)
            }
        }
    }

    pub async fn dispatch_event(&self, event: ChannelEvent) -> DispatchOutcome {
        let Some(handler) = self.registry.resolve(&event.channel) else {
            debug!(channel = %event.channel, "No handler bound to channel, skipping");
            return DispatchOutcome::Unrouted;
        };

        let handler_name = handler.name().to_string();
        let channel = event.channel.clone();

        debug!(channel = %channel, handler = %handler_name, "Dispatching event");

        // Spawned so a panicking handler cannot take the consumer down.
        let task = tokio::spawn(async move { handler.handle(&event).await });
        let abort = task.abort_handle();

        let failure = match timeout(self.handler_timeout, task).await {
            Ok(Ok(Ok(()))) => {
                debug!(channel = %channel, handler = %handler_name, "Event handled");
                return DispatchOutcome::Handled {
                    handler: handler_name,
                };
            }
            Ok(Ok(Err(e))) => DispatchError::Handler {
                channel,
                handler: handler_name,
                reason: format!("{:#}", e),
            },
            Ok(Err(join_error)) => DispatchError::Handler {
                channel,
                handler: handler_name,
                reason: if join_error.is_panic() {
                    "handler panicked".to_string()
                } else {
                    join_error.to_string()
                },
            },
            Err(_) => {
                abort.abort();
                DispatchError::Timeout {
                    channel,
                    handler: handler_name,
                    timeout_ms: self.handler_timeout.as_millis() as u64,
                }
            }
        };

        error!(channel = %failure.channel(), error = %failure, "Handler failed");

        DispatchOutcome::Failed(failure)
    }
}
