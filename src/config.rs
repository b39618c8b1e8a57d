use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    handlers::HandlerKind,
    models::{
        circuit_breaker::CircuitBreakerConfig, retry::RetryConfig,
        validation::validate_channel_matcher,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerBackend {
    RabbitMq,
    Redis,
}

/// One `matcher=handler_id` entry of `HANDLER_BINDINGS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerBindingConfig {
    pub matcher: String,
    pub handler: HandlerKind,
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_broker")]
    pub broker: String,

    #[serde(default)]
    pub rabbitmq_url: String,
    #[serde(default = "default_event_exchange")]
    pub event_exchange: String,
    #[serde(default = "default_consumer_queue_name")]
    pub consumer_queue_name: String,
    #[serde(default = "default_failed_queue_name")]
    pub failed_queue_name: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,

    pub redis_url: String,

    /// Broker-level subscription. How wide `*` reaches depends on the backend:
    /// an AMQP binding key matches exactly one dot segment, while a Redis
    /// `PSUBSCRIBE` glob also crosses dots (`task.*` receives `task.a.b`).
    /// Handler bindings narrow deliveries to exact segments either way.
    #[serde(default = "default_subscribe_patterns")]
    pub subscribe_patterns: Vec<String>,
    #[serde(default = "default_handler_bindings")]
    pub handler_bindings: Vec<String>,

    #[serde(default = "default_broadcast_channel_prefix")]
    pub broadcast_channel_prefix: String,
    #[serde(default = "default_broadcast_timeout_ms")]
    pub broadcast_timeout_ms: u64,
    #[serde(default = "default_push_timeout_ms")]
    pub push_timeout_ms: u64,
    #[serde(default = "default_handler_timeout_ms")]
    pub handler_timeout_ms: u64,
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,

    #[serde(default)]
    pub fcm_enabled: bool,
    #[serde(default)]
    pub fcm_project_id: String,
    #[serde(default = "default_fcm_base_url")]
    pub fcm_base_url: String,
    #[serde(default = "default_fcm_notification_title")]
    pub fcm_notification_title: String,
    #[serde(default = "default_device_token_key_prefix")]
    pub device_token_key_prefix: String,

    #[serde(default = "default_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_circuit_timeout_seconds")]
    pub circuit_breaker_timeout_seconds: u64,
    #[serde(default = "default_success_threshold")]
    pub circuit_breaker_success_threshold: u32,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        config.validate()?;

        Ok(config)
    }

    /// Cross-field checks that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), Error> {
        let backend = self.broker_backend()?;

        if backend == BrokerBackend::RabbitMq && self.rabbitmq_url.is_empty() {
            return Err(anyhow!("RABBITMQ_URL is required when BROKER=rabbitmq"));
        }

        if self.subscribe_patterns.is_empty() {
            return Err(anyhow!("SUBSCRIBE_PATTERNS must name at least one pattern"));
        }

        for pattern in &self.subscribe_patterns {
            validate_channel_matcher(pattern)?;
        }

        if self.fcm_enabled && self.fcm_project_id.is_empty() {
            return Err(anyhow!("FCM_PROJECT_ID is required when FCM_ENABLED=true"));
        }

        self.bindings()?;

        Ok(())
    }

    pub fn broker_backend(&self) -> Result<BrokerBackend, Error> {
        match self.broker.trim().to_ascii_lowercase().as_str() {
            "rabbitmq" | "amqp" => Ok(BrokerBackend::RabbitMq),
            "redis" => Ok(BrokerBackend::Redis),
            other => Err(anyhow!("Unsupported broker backend '{}'", other)),
        }
    }

    /// Parses `HANDLER_BINDINGS`, keeping the configured order.
    pub fn bindings(&self) -> Result<Vec<HandlerBindingConfig>, Error> {
        self.handler_bindings
            .iter()
            .map(|entry| {
                let (matcher, handler) = entry
                    .split_once('=')
                    .ok_or_else(|| anyhow!("Handler binding '{}' is not matcher=handler", entry))?;

                let matcher = matcher.trim();
                validate_channel_matcher(matcher)?;

                Ok(HandlerBindingConfig {
                    matcher: matcher.to_string(),
                    handler: HandlerKind::from_id(handler.trim())?,
                })
            })
            .collect()
    }

    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_failure_threshold,
            timeout_seconds: self.circuit_breaker_timeout_seconds,
            success_threshold: self.circuit_breaker_success_threshold,
        }
    }
}

fn default_broker() -> String {
    "rabbitmq".to_string()
}

fn default_event_exchange() -> String {
    "campus.events".to_string()
}

fn default_consumer_queue_name() -> String {
    "campus.notifications".to_string()
}

fn default_failed_queue_name() -> String {
    "campus.notifications.failed".to_string()
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_subscribe_patterns() -> Vec<String> {
    ["task.*", "student.*", "course.*", "notification.*"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_handler_bindings() -> Vec<String> {
    [
        "task.assigned=task_assigned",
        "task.updated=task_updated",
        "task.submitted=task_submitted",
        "task.deadline_reminder=task_deadline",
        "student.registered=student_registered",
        "notification.*=generic",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_broadcast_channel_prefix() -> String {
    "private-".to_string()
}

fn default_broadcast_timeout_ms() -> u64 {
    5_000
}

fn default_push_timeout_ms() -> u64 {
    10_000
}

fn default_handler_timeout_ms() -> u64 {
    30_000
}

fn default_shutdown_grace_seconds() -> u64 {
    15
}

fn default_fcm_base_url() -> String {
    "https://fcm.googleapis.com".to_string()
}

fn default_fcm_notification_title() -> String {
    "Thông báo mới".to_string()
}

fn default_device_token_key_prefix() -> String {
    "device_tokens".to_string()
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_circuit_timeout_seconds() -> u64 {
    60
}

fn default_success_threshold() -> u32 {
    2
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    200
}

fn default_max_retry_delay_ms() -> u64 {
    5_000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

fn default_server_port() -> u16 {
    8080
}
