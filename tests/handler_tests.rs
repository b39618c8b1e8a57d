use campus_notify::{
    handlers::{
        GenericNotification, NotificationRule, StudentRegistered, TaskAssigned,
        TaskDeadlineReminder, TaskSubmitted, TaskUpdated,
    },
    models::notification::UserType,
};
use serde_json::{Value, json};

use crate::common::event;

#[test]
fn test_task_assigned_builds_content_from_task_name() {
    let intent = TaskAssigned
        .build(&event(
            "task.assigned",
            json!({"user_id": 42, "task_name": "Write report", "task_id": 7}),
        ))
        .unwrap()
        .expect("intent should be built");

    assert_eq!(intent.user_id, 42);
    assert_eq!(intent.user_type, UserType::Lecturer);
    assert_eq!(intent.content, "Bạn vừa được giao công việc: Write report");
    assert_eq!(intent.metadata.get("task_id"), Some(&json!(7)));
    assert_eq!(intent.metadata.get("event"), Some(&json!("task.assigned")));
}

#[test]
fn test_missing_user_id_skips_without_error() {
    let payloads = [
        json!({"task_name": "X"}),
        json!({"user_id": null, "task_name": "X"}),
        json!({"user_id": "", "task_name": "X"}),
    ];

    for payload in payloads {
        let result = TaskAssigned.build(&event("task.assigned", payload.clone()));
        assert!(
            matches!(result, Ok(None)),
            "payload {} should be skipped",
            payload
        );
    }

    assert!(matches!(
        StudentRegistered.build(&event("student.registered", json!({"student_name": "An"}))),
        Ok(None)
    ));
    assert!(matches!(
        TaskSubmitted.build(&event("task.submitted", json!({"user_id": 3, "task_name": "X"}))),
        Ok(None)
    ));
}

#[test]
fn test_numeric_string_user_id_is_accepted() {
    let intent = TaskUpdated
        .build(&event("task.updated", json!({"user_id": "42", "task_name": "Lab 3"})))
        .unwrap()
        .unwrap();

    assert_eq!(intent.user_id, 42);
    assert_eq!(intent.content, "Công việc Lab 3 vừa được cập nhật");
}

#[test]
fn test_malformed_user_id_is_an_error() {
    let result = TaskUpdated.build(&event("task.updated", json!({"user_id": "abc"})));

    let error = result.expect_err("non-numeric id must fail");
    assert!(error.to_string().contains("user_id"));
}

#[test]
fn test_optional_fields_fall_back_to_default_content() {
    let assigned = TaskAssigned
        .build(&event("task.assigned", json!({"user_id": 1})))
        .unwrap()
        .unwrap();
    assert_eq!(assigned.content, "Bạn vừa được giao một công việc mới");

    let updated = TaskUpdated
        .build(&event("task.updated", json!({"user_id": 1, "task_name": "  "})))
        .unwrap()
        .unwrap();
    assert_eq!(updated.content, "Một công việc của bạn vừa được cập nhật");

    let deadline = TaskDeadlineReminder
        .build(&event("task.deadline_reminder", json!({"user_id": 1, "task_name": "Đồ án"})))
        .unwrap()
        .unwrap();
    assert_eq!(deadline.content, "Công việc Đồ án sắp đến hạn");

    let welcome = StudentRegistered
        .build(&event("student.registered", json!({"user_id": 1})))
        .unwrap()
        .unwrap();
    assert_eq!(welcome.content, "Tài khoản sinh viên của bạn đã được tạo");
}

#[test]
fn test_deadline_reminder_includes_deadline() {
    let intent = TaskDeadlineReminder
        .build(&event(
            "task.deadline_reminder",
            json!({"user_id": 9, "task_name": "Đồ án", "deadline": "2024-12-31"}),
        ))
        .unwrap()
        .unwrap();

    assert_eq!(intent.content, "Công việc Đồ án sắp đến hạn (2024-12-31)");
    assert_eq!(intent.metadata.get("deadline"), Some(&json!("2024-12-31")));
}

#[test]
fn test_task_submitted_targets_the_assigner() {
    let intent = TaskSubmitted
        .build(&event(
            "task.submitted",
            json!({
                "user_id": 15,
                "assigner_id": 3,
                "submitter_name": "Trần Thị B",
                "task_name": "Báo cáo tuần"
            }),
        ))
        .unwrap()
        .unwrap();

    assert_eq!(intent.user_id, 3);
    assert_eq!(intent.user_type, UserType::Lecturer);
    assert_eq!(intent.content, "Trần Thị B đã nộp kết quả công việc: Báo cáo tuần");
    assert_eq!(intent.metadata.get("submitter_id"), Some(&json!(15)));
}

#[test]
fn test_task_submitted_honours_assigner_type() {
    let intent = TaskSubmitted
        .build(&event(
            "task.submitted",
            json!({"assigner_id": 3, "assigner_type": "admin", "task_name": "X"}),
        ))
        .unwrap()
        .unwrap();

    assert_eq!(intent.user_type, UserType::Admin);
    assert_eq!(intent.content, "Có kết quả mới cho công việc: X");
    assert!(!intent.metadata.contains_key("submitter_id"));
}

#[test]
fn test_student_registration_targets_a_student() {
    let intent = StudentRegistered
        .build(&event(
            "student.registered",
            json!({
                "user_id": 100,
                "user_type": "lecturer",
                "student_name": "Lê Văn C",
                "student_code": "SV001"
            }),
        ))
        .unwrap()
        .unwrap();

    assert_eq!(intent.user_type, UserType::Student);
    assert_eq!(intent.content, "Chào mừng Lê Văn C đến với hệ thống quản lý đào tạo");
    assert_eq!(intent.metadata.get("student_code"), Some(&json!("SV001")));
}

#[test]
fn test_generic_passes_content_and_data_through() {
    let intent = GenericNotification
        .build(&event(
            "notification.announcement",
            json!({
                "user_id": 5,
                "user_type": "student",
                "content": "Lịch thi đã được cập nhật",
                "data": {"exam_id": 12, "room": "A1"}
            }),
        ))
        .unwrap()
        .unwrap();

    assert_eq!(intent.user_type, UserType::Student);
    assert_eq!(intent.content, "Lịch thi đã được cập nhật");
    assert_eq!(intent.metadata.get("exam_id"), Some(&json!(12)));
    assert_eq!(intent.metadata.get("room"), Some(&json!("A1")));
    assert_eq!(
        intent.metadata.get("event"),
        Some(&Value::from("notification.announcement"))
    );
}

#[test]
fn test_generic_defaults_unknown_role_to_user() {
    let intent = GenericNotification
        .build(&event("notification.system", json!({"user_id": 5, "user_type": "guest"})))
        .unwrap()
        .unwrap();

    assert_eq!(intent.user_type, UserType::User);
    assert_eq!(intent.content, "Bạn có thông báo mới");
}

#[test]
fn test_tracking_ids_are_lifted_into_the_intent() {
    let intent = TaskAssigned
        .build(&event(
            "task.assigned",
            json!({
                "user_id": 42,
                "task_name": "X",
                "notification_id": 900,
                "user_notification_id": "901"
            }),
        ))
        .unwrap()
        .unwrap();

    assert_eq!(intent.notification_id, Some(900));
    assert_eq!(intent.user_notification_id, Some(901));
    assert!(!intent.metadata.contains_key("notification_id"));
}

#[test]
fn test_malformed_tracking_id_does_not_block_delivery() {
    let intent = TaskAssigned
        .build(&event(
            "task.assigned",
            json!({
                "user_id": 42,
                "task_name": "X",
                "notification_id": "n-1",
                "user_notification_id": 77
            }),
        ))
        .expect("tracking ids are optional")
        .expect("intent should be built");

    assert_eq!(intent.user_id, 42);
    assert_eq!(intent.notification_id, None);
    assert_eq!(intent.user_notification_id, Some(77));

    let generic = GenericNotification
        .build(&event(
            "notification.system",
            json!({"user_id": 5, "user_notification_id": {"id": 1}}),
        ))
        .unwrap()
        .unwrap();
    assert_eq!(generic.user_notification_id, None);
}
