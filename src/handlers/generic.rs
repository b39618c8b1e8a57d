use anyhow::{Error, Result};
use serde_json::Value;

use crate::{
    handlers::tracking_ids,
    models::{
        message::ChannelEvent,
        notification::{NotificationIntent, UserType},
    },
};

/// Pass-through for events that already carry ready-made notification text.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericNotification;

impl super::NotificationRule for GenericNotification {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn build(&self, event: &ChannelEvent) -> Result<Option<NotificationIntent>, Error> {
        let Some(user_id) = event.id("user_id")? else {
            return Ok(None);
        };

        let user_type = event
            .text("user_type")
            .map(|s| UserType::from_string(&s))
            .unwrap_or(UserType::User);

        let content = event
            .text("content")
            .unwrap_or_else(|| "Bạn có thông báo mới".to_string());

        let mut metadata = match event.get("data") {
            Some(Value::Object(data)) => data.clone(),
            _ => Default::default(),
        };
        metadata.insert("event".to_string(), Value::from(event.channel.as_str()));

        let (notification_id, user_notification_id) = tracking_ids(event);

        Ok(Some(
            NotificationIntent::new(user_id, user_type, content)
                .with_metadata(metadata)
                .with_ids(notification_id, user_notification_id),
        ))
    }
}
