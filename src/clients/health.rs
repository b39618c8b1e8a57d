use std::{collections::BTreeMap, time::Instant};

use anyhow::{Error, Result};
use chrono::{SecondsFormat, Utc};
use redis::{AsyncCommands, aio::MultiplexedConnection};
use tracing::{debug, warn};

use crate::{
    clients::{circuit_breaker::CircuitBreaker, fcm::FCM_SERVICE, rbmq::RabbitMqClient},
    config::{BrokerBackend, Config},
    models::{
        circuit_breaker::CircuitState,
        health::{ComponentHealth, HealthReport, HealthStatus},
    },
};

const BROKER: &str = "message_broker";
const CACHE: &str = "cache_service";

/// Probes the worker's collaborators on demand.
pub struct HealthChecker {
    config: Config,
}

impl HealthChecker {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn check_all(&self) -> HealthReport {
        let mut components = BTreeMap::new();

        components.insert(BROKER.to_string(), self.check_broker().await);
        components.insert(CACHE.to_string(), self.check_redis().await);
        components.insert(FCM_SERVICE.to_string(), self.check_push().await);

        HealthReport {
            status: overall_status(&components),
            broker: self.config.broker.to_ascii_lowercase(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            components,
        }
    }

    async fn check_broker(&self) -> ComponentHealth {
        match self.config.broker_backend() {
            Ok(BrokerBackend::RabbitMq) => self.check_rabbitmq().await,
            // Pub/sub rides on the cache instance.
            Ok(BrokerBackend::Redis) => self.check_redis().await,
            Err(e) => ComponentHealth::down(e.to_string()),
        }
    }

    async fn check_redis(&self) -> ComponentHealth {
        let start = Instant::now();

        let ping = async {
            let mut conn = self.redis_connection().await?;
            conn.ping::<String>().await?;
            Ok::<_, Error>(())
        };

        match ping.await {
            Ok(()) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                debug!(latency_ms, "Redis reachable");
                ComponentHealth::up(latency_ms)
            }
            Err(e) => {
                warn!(error = %e, "Redis health probe failed");
                ComponentHealth::down(format!("redis unreachable: {}", e))
            }
        }
    }

    async fn check_rabbitmq(&self) -> ComponentHealth {
        let start = Instant::now();

        match RabbitMqClient::connect(&self.config).await {
            Ok(client) if client.is_connected() => {
                let latency_ms = start.elapsed().as_millis() as u64;
                debug!(latency_ms, "RabbitMQ reachable");
                ComponentHealth::up(latency_ms)
            }
            Ok(_) => ComponentHealth::down("rabbitmq connection not established"),
            Err(e) => {
                warn!(error = %e, "RabbitMQ health probe failed");
                ComponentHealth::down(format!("rabbitmq unreachable: {}", e))
            }
        }
    }

    async fn check_push(&self) -> ComponentHealth {
        if !self.config.fcm_enabled {
            return ComponentHealth::disabled();
        }

        let state = async {
            let mut conn = self.redis_connection().await?;
            CircuitBreaker::read_state(&mut conn, FCM_SERVICE).await
        };

        match state.await {
            Ok(CircuitState::Closed) => ComponentHealth::up(0).with_circuit(CircuitState::Closed.as_str()),
            Ok(CircuitState::HalfOpen) => ComponentHealth::degraded(
                CircuitState::HalfOpen.as_str(),
                Some("probing after open circuit".to_string()),
            ),
            Ok(CircuitState::Open) => ComponentHealth::degraded(CircuitState::Open.as_str(), None),
            Err(e) => {
                warn!(error = %e, "Could not read push circuit state");
                ComponentHealth::down(format!("circuit state unavailable: {}", e))
            }
        }
    }

    async fn redis_connection(&self) -> Result<MultiplexedConnection, Error> {
        let client = redis::Client::open(self.config.redis_url.as_str())?;
        Ok(client.get_multiplexed_async_connection().await?)
    }
}

/// Broker or cache down makes the worker unhealthy; anything else less than
/// healthy only degrades it.
pub fn overall_status(components: &BTreeMap<String, ComponentHealth>) -> HealthStatus {
    let mut status = HealthStatus::Healthy;

    for (name, health) in components {
        match health.status {
            HealthStatus::Healthy => {}
            HealthStatus::Unhealthy if name == BROKER || name == CACHE => {
                return HealthStatus::Unhealthy;
            }
            _ => status = HealthStatus::Degraded,
        }
    }

    status
}
