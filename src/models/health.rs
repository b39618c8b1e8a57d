use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub broker: String,
    pub timestamp: String,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ComponentHealth {
    fn new(status: HealthStatus) -> Self {
        Self {
            status,
            latency_ms: None,
            circuit: None,
            detail: None,
        }
    }

    pub fn up(latency_ms: u64) -> Self {
        Self {
            latency_ms: Some(latency_ms),
            ..Self::new(HealthStatus::Healthy)
        }
    }

    pub fn down(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::new(HealthStatus::Unhealthy)
        }
    }

    /// Reachable, but calls are being short-circuited.
    pub fn degraded(circuit: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            circuit: Some(circuit.into()),
            detail,
            ..Self::new(HealthStatus::Degraded)
        }
    }

    /// A component switched off in configuration counts as healthy.
    pub fn disabled() -> Self {
        Self {
            detail: Some("disabled".to_string()),
            ..Self::new(HealthStatus::Healthy)
        }
    }

    pub fn with_circuit(mut self, circuit: impl Into<String>) -> Self {
        self.circuit = Some(circuit.into());
        self
    }
}
