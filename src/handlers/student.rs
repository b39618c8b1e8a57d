use anyhow::{Error, Result};

use crate::{
    handlers::{NotificationRule, collect_metadata, tracking_ids},
    models::{
        message::ChannelEvent,
        notification::{NotificationIntent, UserType},
    },
};

/// `student.registered`: welcomes a newly created student account.
#[derive(Debug, Clone, Copy, Default)]
pub struct StudentRegistered;

impl NotificationRule for StudentRegistered {
    fn name(&self) -> &'static str {
        "student_registered"
    }

    fn build(&self, event: &ChannelEvent) -> Result<Option<NotificationIntent>, Error> {
        let Some(user_id) = event.id("user_id")? else {
            return Ok(None);
        };

        let content = match event.text("student_name") {
            Some(name) => format!("Chào mừng {} đến với hệ thống quản lý đào tạo", name),
            None => "Tài khoản sinh viên của bạn đã được tạo".to_string(),
        };

        let (notification_id, user_notification_id) = tracking_ids(event);
        let metadata = collect_metadata(
            event,
            &["student_id", "student_code", "student_name", "class_id", "department_id"],
        );

        Ok(Some(
            NotificationIntent::new(user_id, UserType::Student, content)
                .with_metadata(metadata)
                .with_ids(notification_id, user_notification_id),
        ))
    }
}
