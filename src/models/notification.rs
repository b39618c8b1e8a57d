use std::fmt::{Display, Formatter, Result};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const NOTIFICATION_EVENT: &str = "user.notification";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Student,
    Lecturer,
    Admin,
    User,
}

impl UserType {
    /// Unknown roles fall back to the generic `user`.
    pub fn from_string(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => UserType::Student,
            "lecturer" => UserType::Lecturer,
            "admin" => UserType::Admin,
            _ => UserType::User,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            UserType::Student => "student",
            UserType::Lecturer => "lecturer",
            UserType::Admin => "admin",
            UserType::User => "user",
        }
    }
}

impl Display for UserType {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(self.as_str())
    }
}

/// What a handler wants delivered to one user.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationIntent {
    pub user_id: i64,
    pub user_type: UserType,
    pub content: String,
    pub metadata: Map<String, Value>,
    pub notification_id: Option<i64>,
    pub user_notification_id: Option<i64>,
}

impl NotificationIntent {
    pub fn new(user_id: i64, user_type: UserType, content: impl Into<String>) -> Self {
        Self {
            user_id,
            user_type,
            content: content.into(),
            metadata: Map::new(),
            notification_id: None,
            user_notification_id: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_ids(mut self, notification_id: Option<i64>, user_notification_id: Option<i64>) -> Self {
        self.notification_id = notification_id;
        self.user_notification_id = user_notification_id;
        self
    }
}

/// Where a delivery was triggered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOrigin {
    /// The background consumer: every listener receives the broadcast.
    Background,
    /// A live request: the originating socket does not receive its own broadcast.
    Request { socket_id: String },
}

impl DeliveryOrigin {
    pub fn excluded_socket(&self) -> Option<&str> {
        match self {
            DeliveryOrigin::Background => None,
            DeliveryOrigin::Request { socket_id } => Some(socket_id.as_str()),
        }
    }
}

/// Wire payload broadcast on a user's private channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub user_id: i64,
    pub user_type: UserType,
    pub content: String,
    pub data: Map<String, Value>,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip)]
    pub channel: String,
}

impl PushEnvelope {
    pub fn from_intent(intent: &NotificationIntent) -> Self {
        let mut data = intent.metadata.clone();
        if let Some(id) = intent.notification_id {
            data.insert("notification_id".to_string(), Value::from(id));
        }
        if let Some(id) = intent.user_notification_id {
            data.insert("user_notification_id".to_string(), Value::from(id));
        }

        Self {
            user_id: intent.user_id,
            user_type: intent.user_type,
            content: intent.content.clone(),
            data,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            kind: "push".to_string(),
            channel: Self::channel_for(intent.user_id),
        }
    }

    /// The only place a user's delivery channel name is built.
    pub fn channel_for(user_id: i64) -> String {
        format!("notifications.user.{}", user_id)
    }
}
