use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    models::message::{BrokerMessage, DlqMessage},
    pipeline::dispatcher::{DispatchOutcome, MessageSource},
};

/// RabbitMQ topic-exchange consumer.
///
/// Every worker process consumes from the same durable queue, so the queue
/// acts as the consumer group. Deliveries are acked after dispatch.
pub struct RabbitMqClient {
    connection: Connection,
    channel: Channel,
    exchange: String,
    queue_name: String,
    failed_queue_name: String,
    consumer: Option<Consumer>,
}

impl RabbitMqClient {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ");

        let connection = Connection::connect(&config.rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set up QoS: {}", e))?;

        channel
            .exchange_declare(
                config.event_exchange.as_str(),
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare event exchange: {}", e))?;

        for queue in [&config.consumer_queue_name, &config.failed_queue_name] {
            channel
                .queue_declare(
                    queue.as_str(),
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| anyhow!("Failed to declare queue '{}': {}", queue, e))?;
        }

        info!(
            exchange = %config.event_exchange,
            queue = %config.consumer_queue_name,
            prefetch = config.prefetch_count,
            "RabbitMQ topology declared"
        );

        Ok(Self {
            connection,
            channel,
            exchange: config.event_exchange.clone(),
            queue_name: config.consumer_queue_name.clone(),
            failed_queue_name: config.failed_queue_name.clone(),
            consumer: None,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    pub async fn bind_patterns(&self, patterns: &[String]) -> Result<(), Error> {
        for pattern in patterns {
            self.channel
                .queue_bind(
                    self.queue_name.as_str(),
                    self.exchange.as_str(),
                    pattern.as_str(),
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| anyhow!("Failed to bind pattern '{}': {}", pattern, e))?;

            debug!(pattern = %pattern, queue = %self.queue_name, "Bound routing pattern");
        }

        Ok(())
    }

    pub async fn create_consumer(&self) -> Result<Consumer, Error> {
        let consumer_tag = format!("event-dispatcher-{}", Uuid::new_v4());

        let consumer = self
            .channel
            .basic_consume(
                self.queue_name.as_str(),
                consumer_tag.as_str(),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create consumer: {}", e))?;

        info!(consumer_tag = %consumer_tag, queue = %self.queue_name, "Consumer created");

        Ok(consumer)
    }

    pub async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to acknowledge message: {}", e))?;

        Ok(())
    }

    pub async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), Error> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|e| anyhow!("Failed to reject message: {}", e))?;

        Ok(())
    }

    pub async fn publish_to_dlq(&self, message: &DlqMessage) -> Result<(), Error> {
        let payload = serde_json::to_vec(message)?;

        self.channel
            .basic_publish(
                "",
                self.failed_queue_name.as_str(),
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|e| anyhow!("Failed to publish message to dlq: {}", e))?;

        Ok(())
    }
}

#[async_trait]
impl MessageSource for RabbitMqClient {
    async fn subscribe(&mut self, patterns: &[String]) -> Result<(), Error> {
        self.bind_patterns(patterns).await?;
        self.consumer = Some(self.create_consumer().await?);
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<BrokerMessage>, Error> {
        let consumer = self
            .consumer
            .as_mut()
            .ok_or_else(|| anyhow!("RabbitMQ consumer is not subscribed"))?;

        match consumer.next().await {
            Some(Ok(delivery)) => Ok(Some(
                BrokerMessage::new(delivery.routing_key.as_str(), delivery.data)
                    .with_delivery_tag(delivery.delivery_tag),
            )),
            Some(Err(e)) => Err(anyhow!("Failed to receive delivery: {}", e)),
            None => Ok(None),
        }
    }

    async fn settle(&mut self, message: &BrokerMessage, outcome: &DispatchOutcome) -> Result<(), Error> {
        let Some(delivery_tag) = message.delivery_tag else {
            return Ok(());
        };

        match outcome {
            DispatchOutcome::Failed(e) if e.is_decode() => {
                let dlq_message = DlqMessage {
                    channel: message.channel.clone(),
                    raw_payload: String::from_utf8_lossy(&message.payload).into_owned(),
                    failure_reason: e.to_string(),
                    failed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                };

                if let Err(dlq_err) = self.publish_to_dlq(&dlq_message).await {
                    warn!(channel = %message.channel, error = %dlq_err, "Failed to park malformed message");
                }

                self.reject(delivery_tag, false).await
            }
            // Handler failures are isolated, not retried.
            _ => self.acknowledge(delivery_tag).await,
        }
    }
}
