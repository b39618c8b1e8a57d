use std::future::Future;

use anyhow::{Error, Result, anyhow};
use chrono::Utc;
use redis::{AsyncCommands, aio::MultiplexedConnection};
use tracing::{debug, info, warn};

use crate::models::circuit_breaker::{CircuitBreakerConfig, CircuitState};

/// Circuit breaker whose state lives in Redis, so every worker process
/// sharing the same Redis sees the same circuit.
#[derive(Clone)]
pub struct CircuitBreaker {
    service_name: String,
    connection: MultiplexedConnection,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(
        service_name: impl Into<String>,
        connection: MultiplexedConnection,
        config: CircuitBreakerConfig,
    ) -> Self {
        let service_name = service_name.into();
        info!(service = %service_name, "Circuit breaker initialized");

        Self {
            service_name,
            connection,
            config,
        }
    }

    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        match self.state().await? {
            CircuitState::Open => {
                if self.should_attempt_reset().await? {
                    info!(service = %self.service_name, "Circuit breaker attempting reset");
                    self.set_state(CircuitState::HalfOpen).await?;
                    return self.try_operation(operation).await;
                }
                warn!(service = %self.service_name, "Circuit breaker is open, rejecting request");
                Err(anyhow!("Circuit breaker is open for {}", self.service_name))
            }
            CircuitState::HalfOpen => {
                debug!(service = %self.service_name, "Circuit breaker in half-open state");
                self.try_operation(operation).await
            }
            CircuitState::Closed => self.try_operation(operation).await,
        }
    }

    async fn try_operation<F, Fut, T>(&self, operation: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        match operation().await {
            Ok(result) => {
                self.record_success().await?;
                Ok(result)
            }
            Err(e) => {
                self.record_failure().await?;
                Err(e)
            }
        }
    }

    pub async fn state(&self) -> Result<CircuitState, Error> {
        Self::read_state(&mut self.connection.clone(), &self.service_name).await
    }

    /// Reads a service's shared circuit state without building a breaker.
    pub async fn read_state(
        connection: &mut MultiplexedConnection,
        service_name: &str,
    ) -> Result<CircuitState, Error> {
        let value: Option<String> = connection.get(circuit_key(service_name, "state")).await?;

        Ok(value
            .map(|s| CircuitState::from_string(&s))
            .unwrap_or(CircuitState::Closed))
    }

    async fn record_success(&self) -> Result<(), Error> {
        match self.state().await? {
            CircuitState::HalfOpen => {
                let successes = self.increment("successes", None).await?;
                debug!(
                    service = %self.service_name,
                    successes,
                    threshold = self.config.success_threshold,
                    "Circuit breaker success recorded"
                );

                if successes >= self.config.success_threshold {
                    self.set_state(CircuitState::Closed).await?;
                    self.reset_counters().await?;
                    info!(service = %self.service_name, "Circuit breaker closed after successful recovery");
                }
            }
            CircuitState::Closed => {
                let mut conn = self.connection.clone();
                conn.del::<_, ()>(self.key("failures")).await?;
            }
            CircuitState::Open => {}
        }

        Ok(())
    }

    async fn record_failure(&self) -> Result<(), Error> {
        if self.state().await? == CircuitState::HalfOpen {
            self.open().await?;
            warn!(service = %self.service_name, "Circuit breaker reopened after failed recovery attempt");
            return Ok(());
        }

        let failures = self
            .increment("failures", Some(self.config.timeout_seconds))
            .await?;
        debug!(
            service = %self.service_name,
            failures,
            threshold = self.config.failure_threshold,
            "Circuit breaker failure recorded"
        );

        if failures >= self.config.failure_threshold {
            self.open().await?;
            warn!(
                service = %self.service_name,
                failures,
                "Circuit breaker opened due to consecutive failures"
            );
        }

        Ok(())
    }

    fn key(&self, field: &str) -> String {
        circuit_key(&self.service_name, field)
    }

    async fn set_state(&self, state: CircuitState) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(self.key("state"), state.as_str()).await?;
        Ok(())
    }

    async fn open(&self) -> Result<(), Error> {
        self.set_state(CircuitState::Open).await?;
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(self.key("opened_at"), Utc::now().timestamp())
            .await?;
        conn.del::<_, ()>(self.key("successes")).await?;
        Ok(())
    }

    async fn increment(&self, field: &str, expire_seconds: Option<u64>) -> Result<u32, Error> {
        let key = self.key(field);
        let mut conn = self.connection.clone();
        let count: u32 = conn.incr(&key, 1).await?;

        if let Some(seconds) = expire_seconds {
            conn.expire::<_, ()>(&key, seconds as i64).await?;
        }

        Ok(count)
    }

    async fn reset_counters(&self) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(vec![
            self.key("failures"),
            self.key("successes"),
            self.key("opened_at"),
        ])
        .await?;

        Ok(())
    }

    async fn should_attempt_reset(&self) -> Result<bool, Error> {
        let mut conn = self.connection.clone();
        let opened_at: Option<i64> = conn.get(self.key("opened_at")).await?;

        Ok(opened_at
            .map(|opened_at| {
                let elapsed = Utc::now().timestamp().saturating_sub(opened_at);
                elapsed >= self.config.timeout_seconds as i64
            })
            .unwrap_or(true))
    }
}

/// Redis key of one field of a service's shared circuit.
pub fn circuit_key(service_name: &str, field: &str) -> String {
    format!("circuit:{}:{}", service_name, field)
}
