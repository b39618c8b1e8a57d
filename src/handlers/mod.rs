//! Notification handlers, one rule per business event.
//!
//! A rule is a pure function of the decoded event. It returns `Ok(None)` when
//! a required key is missing: partial domain events are skipped, never failed.

use std::{fmt, sync::Arc};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{
    models::{
        message::ChannelEvent,
        notification::{DeliveryOrigin, NotificationIntent},
    },
    pipeline::{
        push::PushChannel,
        registry::{EventHandler, HandlerRegistry},
    },
};

pub mod generic;
pub mod student;
pub mod task;

pub use generic::GenericNotification;
pub use student::StudentRegistered;
pub use task::{TaskAssigned, TaskDeadlineReminder, TaskSubmitted, TaskUpdated};

pub trait NotificationRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn build(&self, event: &ChannelEvent) -> Result<Option<NotificationIntent>, Error>;
}

/// Runs a rule and hands its intent to the push channel.
pub struct NotificationHandler<R> {
    rule: R,
    push_channel: Arc<PushChannel>,
}

impl<R: NotificationRule> NotificationHandler<R> {
    pub fn new(rule: R, push_channel: Arc<PushChannel>) -> Self {
        Self { rule, push_channel }
    }
}

#[async_trait]
impl<R: NotificationRule> EventHandler for NotificationHandler<R> {
    fn name(&self) -> &str {
        self.rule.name()
    }

    async fn handle(&self, event: &ChannelEvent) -> Result<(), Error> {
        let Some(intent) = self.rule.build(event)? else {
            debug!(
                channel = %event.channel,
                handler = self.rule.name(),
                "Required payload keys missing, skipping"
            );
            return Ok(());
        };

        let delivered = self
            .push_channel
            .deliver(&intent, &DeliveryOrigin::Background)
            .await;

        if !delivered {
            warn!(
                channel = %event.channel,
                handler = self.rule.name(),
                user_id = intent.user_id,
                "Notification was not delivered"
            );
        }

        Ok(())
    }
}

/// Handler identifiers accepted in `HANDLER_BINDINGS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    TaskAssigned,
    TaskUpdated,
    TaskSubmitted,
    TaskDeadline,
    StudentRegistered,
    Generic,
}

impl HandlerKind {
    pub fn from_id(id: &str) -> Result<Self, Error> {
        match id {
            "task_assigned" => Ok(HandlerKind::TaskAssigned),
            "task_updated" => Ok(HandlerKind::TaskUpdated),
            "task_submitted" => Ok(HandlerKind::TaskSubmitted),
            "task_deadline" => Ok(HandlerKind::TaskDeadline),
            "student_registered" => Ok(HandlerKind::StudentRegistered),
            "generic" => Ok(HandlerKind::Generic),
            other => Err(anyhow!("Unknown handler '{}'", other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::TaskAssigned => "task_assigned",
            HandlerKind::TaskUpdated => "task_updated",
            HandlerKind::TaskSubmitted => "task_submitted",
            HandlerKind::TaskDeadline => "task_deadline",
            HandlerKind::StudentRegistered => "student_registered",
            HandlerKind::Generic => "generic",
        }
    }

    pub fn build(&self, push_channel: Arc<PushChannel>) -> Arc<dyn EventHandler> {
        match self {
            HandlerKind::TaskAssigned => Arc::new(NotificationHandler::new(TaskAssigned, push_channel)),
            HandlerKind::TaskUpdated => Arc::new(NotificationHandler::new(TaskUpdated, push_channel)),
            HandlerKind::TaskSubmitted => {
                Arc::new(NotificationHandler::new(TaskSubmitted, push_channel))
            }
            HandlerKind::TaskDeadline => {
                Arc::new(NotificationHandler::new(TaskDeadlineReminder, push_channel))
            }
            HandlerKind::StudentRegistered => {
                Arc::new(NotificationHandler::new(StudentRegistered, push_channel))
            }
            HandlerKind::Generic => {
                Arc::new(NotificationHandler::new(GenericNotification, push_channel))
            }
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the process-wide registry from configured bindings, in order.
pub fn build_registry<'a, I>(bindings: I, push_channel: &Arc<PushChannel>) -> Result<HandlerRegistry, Error>
where
    I: IntoIterator<Item = (&'a str, HandlerKind)>,
{
    let mut registry = HandlerRegistry::new();

    for (matcher, kind) in bindings {
        registry.register(matcher, kind.build(Arc::clone(push_channel)))?;
    }

    Ok(registry)
}

/// Copies the listed keys, when present, into notification metadata and
/// tags it with the source channel.
pub(crate) fn collect_metadata(event: &ChannelEvent, keys: &[&str]) -> Map<String, Value> {
    let mut metadata = Map::new();

    for key in keys {
        if let Some(value) = event.get(key).filter(|v| !v.is_null()) {
            metadata.insert((*key).to_string(), value.clone());
        }
    }

    metadata.insert("event".to_string(), Value::from(event.channel.as_str()));
    metadata
}

/// Reads the optional tracking ids carried by most business events.
///
/// A malformed id is dropped with a warning; it never blocks delivery.
pub(crate) fn tracking_ids(event: &ChannelEvent) -> (Option<i64>, Option<i64>) {
    (
        optional_id(event, "notification_id"),
        optional_id(event, "user_notification_id"),
    )
}

fn optional_id(event: &ChannelEvent, key: &str) -> Option<i64> {
    event.id(key).unwrap_or_else(|e| {
        warn!(channel = %event.channel, error = %e, "Ignoring malformed tracking id");
        None
    })
}
