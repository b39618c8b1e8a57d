use std::pin::Pin;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use redis::{AsyncCommands, Client, Msg, aio::MultiplexedConnection};
use serde_json::json;
use tracing::{debug, info};

use crate::{
    config::Config,
    models::{
        message::BrokerMessage,
        notification::{PushEnvelope, UserType},
        retry::RetryConfig,
    },
    pipeline::{
        dispatcher::{DispatchOutcome, MessageSource},
        push::Broadcaster,
    },
    utils::retry_with_backoff,
};

#[derive(Clone)]
pub struct RedisClient {
    connection: MultiplexedConnection,
    retry_config: RetryConfig,
    device_token_key_prefix: String,
}

impl RedisClient {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!("Connecting to Redis");

        let client = Client::open(config.redis_url.as_str())
            .map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            retry_config: config.retry_config(),
            device_token_key_prefix: config.device_token_key_prefix.clone(),
        })
    }

    pub fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), Error> {
        retry_with_backoff(&self.retry_config, || {
            let mut conn = self.connection.clone();

            async move {
                conn.publish::<_, _, ()>(channel, payload)
                    .await
                    .map_err(|e| e.to_string())
            }
        })
        .await
        .map_err(|e| anyhow!("Failed to publish on '{}': {}", channel, e))
    }

    fn device_token_key(&self, user_id: i64, user_type: UserType) -> String {
        format!("{}:{}:{}", self.device_token_key_prefix, user_type, user_id)
    }

    pub async fn device_tokens(&self, user_id: i64, user_type: UserType) -> Result<Vec<String>, Error> {
        let key = self.device_token_key(user_id, user_type);
        let mut conn = self.connection.clone();

        let tokens: Vec<String> = conn
            .smembers(&key)
            .await
            .map_err(|e| anyhow!("Failed to read device tokens: {}", e))?;

        Ok(tokens)
    }

    pub async fn remove_device_token(
        &self,
        user_id: i64,
        user_type: UserType,
        token: &str,
    ) -> Result<(), Error> {
        let key = self.device_token_key(user_id, user_type);
        let mut conn = self.connection.clone();

        conn.srem::<_, _, ()>(&key, token)
            .await
            .map_err(|e| anyhow!("Failed to remove device token: {}", e))?;

        Ok(())
    }
}

/// Publishes `{event, data, socket}` frames for the websocket relay to fan out.
pub struct RedisBroadcaster {
    redis_client: RedisClient,
    channel_prefix: String,
}

impl RedisBroadcaster {
    pub fn new(redis_client: RedisClient, channel_prefix: impl Into<String>) -> Self {
        Self {
            redis_client,
            channel_prefix: channel_prefix.into(),
        }
    }
}

#[async_trait]
impl Broadcaster for RedisBroadcaster {
    async fn broadcast(
        &self,
        channel: &str,
        event: &str,
        envelope: &PushEnvelope,
        except_socket: Option<&str>,
    ) -> Result<(), Error> {
        let frame = json!({
            "event": event,
            "data": envelope,
            "socket": except_socket,
        });
        let payload = serde_json::to_string(&frame)?;
        let target = format!("{}{}", self.channel_prefix, channel);

        self.redis_client.publish(&target, &payload).await?;

        debug!(channel = %target, event, "Published notification frame");

        Ok(())
    }
}

type MessageStream = Pin<Box<dyn Stream<Item = Msg> + Send>>;

/// Redis pattern subscription (`PSUBSCRIBE`). Pub/sub has no acknowledgements,
/// so delivery is at-most-once.
///
/// Patterns are globs: `*` may span several dot segments here. The registry
/// does the exact segment matching.
pub struct RedisSubscriber {
    client: Client,
    messages: Option<MessageStream>,
}

impl RedisSubscriber {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let client = Client::open(config.redis_url.as_str())
            .map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

        Ok(Self {
            client,
            messages: None,
        })
    }
}

#[async_trait]
impl MessageSource for RedisSubscriber {
    async fn subscribe(&mut self, patterns: &[String]) -> Result<(), Error> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| anyhow!("Failed to open redis subscription: {}", e))?;

        for pattern in patterns {
            pubsub
                .psubscribe(pattern.as_str())
                .await
                .map_err(|e| anyhow!("Failed to subscribe to '{}': {}", pattern, e))?;

            debug!(pattern = %pattern, "Subscribed to redis pattern");
        }

        self.messages = Some(Box::pin(pubsub.into_on_message()));

        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<BrokerMessage>, Error> {
        let messages = self
            .messages
            .as_mut()
            .ok_or_else(|| anyhow!("Redis subscriber is not subscribed"))?;

        Ok(messages
            .next()
            .await
            .map(|msg| BrokerMessage::new(msg.get_channel_name(), msg.get_payload_bytes())))
    }

    async fn settle(&mut self, _message: &BrokerMessage, _outcome: &DispatchOutcome) -> Result<(), Error> {
        Ok(())
    }
}
