use std::collections::HashMap;

use anyhow::Result;
use campus_notify::{
    clients::fcm::{FcmClient, FcmDelivery, push_data},
    models::{notification::UserType, retry::RetryConfig},
};
use serde_json::{Map, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

const SEND_PATH: &str = "/v1/projects/campus-demo/messages:send";
const DEVICE_TOKEN: &str = "fcm-device-token-0123456789abcdef";

fn client(server: &MockServer, max_attempts: u32) -> Result<FcmClient> {
    FcmClient::with_static_token(
        server.uri(),
        "campus-demo",
        RetryConfig {
            max_attempts,
            initial_delay_ms: 10,
            max_delay_ms: 20,
            backoff_multiplier: 2,
        },
        "test-token",
    )
}

/// Test: Accepted requests report the FCM message name
#[tokio::test]
async fn test_send_notification_success() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({
            "message": {
                "token": DEVICE_TOKEN,
                "notification": {"title": "Thông báo mới", "body": "Bạn có công việc mới"},
                "data": {"user_id": "42", "user_type": "lecturer", "task_id": "7"}
            }
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"name": "projects/campus-demo/messages/1"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut metadata = Map::new();
    metadata.insert("task_id".to_string(), json!(7));

    let delivery = client(&server, 3)?
        .send_notification(
            DEVICE_TOKEN,
            "Thông báo mới",
            "Bạn có công việc mới",
            push_data(42, UserType::Lecturer, &metadata),
        )
        .await?;

    assert_eq!(
        delivery,
        FcmDelivery::Sent {
            message_name: Some("projects/campus-demo/messages/1".to_string())
        }
    );

    Ok(())
}

/// Test: Unregistered tokens are reported without retrying
#[tokio::test]
async fn test_unregistered_token_is_not_retried() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"status": "NOT_FOUND", "details": [{"errorCode": "UNREGISTERED"}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let delivery = client(&server, 3)?
        .send_notification(DEVICE_TOKEN, "Thông báo mới", "Xin chào", HashMap::new())
        .await?;

    assert_eq!(delivery, FcmDelivery::Unregistered);

    Ok(())
}

/// Test: Server errors are retried until attempts run out
#[tokio::test]
async fn test_server_error_exhausts_retries() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .expect(3)
        .mount(&server)
        .await;

    let result = client(&server, 3)?
        .send_notification(DEVICE_TOKEN, "Thông báo mới", "Xin chào", HashMap::new())
        .await;

    let error = result.expect_err("500 should surface as an error");
    assert!(error.to_string().contains("500"));

    Ok(())
}

#[test]
fn test_push_data_is_stringified() {
    let mut metadata = Map::new();
    metadata.insert("task_id".to_string(), json!(7));
    metadata.insert("urgent".to_string(), json!(true));
    metadata.insert("note".to_string(), json!(null));
    metadata.insert("tags".to_string(), json!(["đồ án"]));

    let data = push_data(5, UserType::Student, &metadata);

    assert_eq!(data["task_id"], "7");
    assert_eq!(data["urgent"], "true");
    assert_eq!(data["note"], "");
    assert_eq!(data["tags"], r#"["đồ án"]"#);
    assert_eq!(data["user_id"], "5");
    assert_eq!(data["user_type"], "student");
}
