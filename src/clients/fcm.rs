use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::{
    clients::{circuit_breaker::CircuitBreaker, redis::RedisClient},
    config::Config,
    models::{
        fcm::{FcmMessage, FcmNotification, FcmRequest, FcmResponse},
        notification::UserType,
        retry::RetryConfig,
        validation::validate_device_token,
    },
    pipeline::push::PushSender,
    utils::{normalize, retry_with_backoff},
};

/// Circuit-breaker service name shared by the sender and the health probe.
pub const FCM_SERVICE: &str = "fcm";

const FCM_SCOPES: &[&str] = &["https://www.googleapis.com/auth/firebase.messaging"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FcmDelivery {
    Sent { message_name: Option<String> },
    /// The device token is no longer registered with FCM.
    Unregistered,
}

enum TokenSource {
    Gcp(OnceCell<Arc<dyn gcp_auth::TokenProvider>>),
    Static(String),
}

impl TokenSource {
    async fn access_token(&self) -> Result<String, Error> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Gcp(provider) => {
                let provider = provider
                    .get_or_try_init(|| async { gcp_auth::provider().await })
                    .await?;
                let token = provider.token(FCM_SCOPES).await?;
                Ok(token.as_str().to_string())
            }
        }
    }
}

/// FCM HTTP v1 client.
pub struct FcmClient {
    http_client: Client,
    base_url: String,
    project_id: String,
    retry_config: RetryConfig,
    token_source: TokenSource,
}

impl FcmClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        info!(project_id = %config.fcm_project_id, "FCM client initialized");

        Self::build(
            config.fcm_base_url.clone(),
            config.fcm_project_id.clone(),
            config.retry_config(),
            TokenSource::Gcp(OnceCell::new()),
            config.push_timeout(),
        )
    }

    /// Client authenticating with a fixed bearer token instead of Google credentials.
    pub fn with_static_token(
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        retry_config: RetryConfig,
        access_token: impl Into<String>,
    ) -> Result<Self, Error> {
        Self::build(
            base_url.into(),
            project_id.into(),
            retry_config,
            TokenSource::Static(access_token.into()),
            Duration::from_secs(10),
        )
    }

    fn build(
        base_url: String,
        project_id: String,
        retry_config: RetryConfig,
        token_source: TokenSource,
        request_timeout: Duration,
    ) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id,
            retry_config,
            token_source,
        })
    }

    pub async fn send_notification(
        &self,
        device_token: &str,
        title: &str,
        body: &str,
        data: HashMap<String, String>,
    ) -> Result<FcmDelivery, Error> {
        debug!(device_token, "Sending FCM push notification");

        let request = FcmRequest {
            message: FcmMessage {
                token: device_token.to_string(),
                notification: FcmNotification {
                    title: title.to_string(),
                    body: body.to_string(),
                },
                data: (!data.is_empty()).then_some(data),
            },
        };

        retry_with_backoff(&self.retry_config, || self.send_once(&request)).await
    }

    async fn send_once(&self, request: &FcmRequest) -> Result<FcmDelivery, Error> {
        let token = self.token_source.access_token().await?;
        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.base_url, self.project_id
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;

        let status = response.status();

        if status.is_success() {
            let body: FcmResponse = response.json().await.unwrap_or(FcmResponse { name: None });
            debug!(message_name = ?body.name, "FCM push notification accepted");
            return Ok(FcmDelivery::Sent {
                message_name: body.name,
            });
        }

        let error_text = response.text().await.unwrap_or_default();

        if status == StatusCode::NOT_FOUND || error_text.contains("UNREGISTERED") {
            return Ok(FcmDelivery::Unregistered);
        }

        Err(anyhow!("FCM request failed with {}: {}", status, error_text))
    }
}

/// Best-effort mobile push: looks up the user's device tokens and sends to each.
pub struct FcmPushSender {
    fcm_client: FcmClient,
    redis_client: RedisClient,
    circuit_breaker: CircuitBreaker,
    title: String,
}

impl FcmPushSender {
    pub fn new(
        fcm_client: FcmClient,
        redis_client: RedisClient,
        circuit_breaker: CircuitBreaker,
        title: impl Into<String>,
    ) -> Self {
        Self {
            fcm_client,
            redis_client,
            circuit_breaker,
            title: title.into(),
        }
    }
}

/// FCM data messages only carry string values.
pub fn push_data(user_id: i64, user_type: UserType, data: &Map<String, Value>) -> HashMap<String, String> {
    let mut payload: HashMap<String, String> = data
        .iter()
        .map(|(key, value)| (key.clone(), normalize(value)))
        .collect();

    payload.insert("user_id".to_string(), user_id.to_string());
    payload.insert("user_type".to_string(), user_type.to_string());
    payload
}

#[async_trait]
impl PushSender for FcmPushSender {
    async fn send_push(
        &self,
        user_id: i64,
        user_type: UserType,
        content: &str,
        data: &Map<String, Value>,
    ) -> Result<(), Error> {
        let tokens = self.redis_client.device_tokens(user_id, user_type).await?;

        if tokens.is_empty() {
            debug!(user_id, user_type = %user_type, "No device tokens registered, skipping push");
            return Ok(());
        }

        let payload = push_data(user_id, user_type, data);
        let mut sent = 0usize;
        let mut last_error = None;

        for token in &tokens {
            if let Err(e) = validate_device_token(token) {
                warn!(user_id, error = %e, "Skipping invalid device token");
                continue;
            }

            let result = self
                .circuit_breaker
                .call(|| {
                    self.fcm_client
                        .send_notification(token, &self.title, content, payload.clone())
                })
                .await;

            match result {
                Ok(FcmDelivery::Sent { .. }) => sent += 1,
                Ok(FcmDelivery::Unregistered) => {
                    info!(user_id, user_type = %user_type, "Removing unregistered device token");
                    if let Err(e) = self
                        .redis_client
                        .remove_device_token(user_id, user_type, token)
                        .await
                    {
                        warn!(user_id, error = %e, "Failed to remove device token");
                    }
                }
                Err(e) => {
                    warn!(user_id, user_type = %user_type, error = %e, "FCM send failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if sent == 0 => Err(e),
            _ => {
                debug!(user_id, sent, devices = tokens.len(), "External push completed");
                Ok(())
            }
        }
    }
}
