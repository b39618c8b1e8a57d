use std::collections::BTreeMap;

use campus_notify::{
    clients::{circuit_breaker::circuit_key, fcm::FCM_SERVICE, health::overall_status},
    models::health::{ComponentHealth, HealthStatus},
};

fn components(entries: Vec<(&str, ComponentHealth)>) -> BTreeMap<String, ComponentHealth> {
    entries
        .into_iter()
        .map(|(name, health)| (name.to_string(), health))
        .collect()
}

#[test]
fn test_all_components_up_is_healthy() {
    let checks = components(vec![
        ("message_broker", ComponentHealth::up(3)),
        ("cache_service", ComponentHealth::up(1)),
        ("fcm", ComponentHealth::disabled()),
    ]);

    assert_eq!(overall_status(&checks), HealthStatus::Healthy);
}

#[test]
fn test_open_push_circuit_only_degrades() {
    let checks = components(vec![
        ("message_broker", ComponentHealth::up(3)),
        ("cache_service", ComponentHealth::up(1)),
        ("fcm", ComponentHealth::degraded("open", None)),
    ]);

    assert_eq!(overall_status(&checks), HealthStatus::Degraded);
}

#[test]
fn test_unreadable_push_circuit_degrades() {
    let checks = components(vec![
        ("message_broker", ComponentHealth::up(3)),
        ("cache_service", ComponentHealth::up(1)),
        ("fcm", ComponentHealth::down("circuit state unavailable")),
    ]);

    assert_eq!(overall_status(&checks), HealthStatus::Degraded);
}

#[test]
fn test_broker_down_is_unhealthy() {
    let checks = components(vec![
        ("cache_service", ComponentHealth::up(1)),
        ("fcm", ComponentHealth::degraded("open", None)),
        ("message_broker", ComponentHealth::down("rabbitmq unreachable")),
    ]);

    assert_eq!(overall_status(&checks), HealthStatus::Unhealthy);
}

#[test]
fn test_component_json_omits_empty_fields() {
    let json = serde_json::to_value(ComponentHealth::up(4)).unwrap();

    assert_eq!(json["status"], "healthy");
    assert_eq!(json["latency_ms"], 4);
    assert!(json.get("circuit").is_none());
    assert!(json.get("detail").is_none());
}

#[test]
fn test_health_reads_the_key_the_fcm_breaker_writes() {
    assert_eq!(circuit_key(FCM_SERVICE, "state"), "circuit:fcm:state");
    assert_eq!(circuit_key(FCM_SERVICE, "opened_at"), "circuit:fcm:opened_at");
}
