use anyhow::{Error, Result};

use crate::{
    handlers::{NotificationRule, collect_metadata, tracking_ids},
    models::{
        message::ChannelEvent,
        notification::{NotificationIntent, UserType},
    },
};

const TASK_KEYS: &[&str] = &["task_id", "task_name", "deadline", "assigner_id", "department_id"];

fn recipient_type(event: &ChannelEvent) -> UserType {
    event
        .text("user_type")
        .map(|s| UserType::from_string(&s))
        .unwrap_or(UserType::Lecturer)
}

fn intent_for(
    event: &ChannelEvent,
    user_id: i64,
    user_type: UserType,
    content: String,
) -> NotificationIntent {
    let (notification_id, user_notification_id) = tracking_ids(event);

    NotificationIntent::new(user_id, user_type, content)
        .with_metadata(collect_metadata(event, TASK_KEYS))
        .with_ids(notification_id, user_notification_id)
}

/// `task.assigned`: tells the assignee about a new task.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskAssigned;

impl NotificationRule for TaskAssigned {
    fn name(&self) -> &'static str {
        "task_assigned"
    }

    fn build(&self, event: &ChannelEvent) -> Result<Option<NotificationIntent>, Error> {
        let Some(user_id) = event.id("user_id")? else {
            return Ok(None);
        };

        let content = match event.text("task_name") {
            Some(task_name) => format!("Bạn vừa được giao công việc: {}", task_name),
            None => "Bạn vừa được giao một công việc mới".to_string(),
        };

        Ok(Some(intent_for(event, user_id, recipient_type(event), content)))
    }
}

/// `task.updated`
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskUpdated;

impl NotificationRule for TaskUpdated {
    fn name(&self) -> &'static str {
        "task_updated"
    }

    fn build(&self, event: &ChannelEvent) -> Result<Option<NotificationIntent>, Error> {
        let Some(user_id) = event.id("user_id")? else {
            return Ok(None);
        };

        let content = match event.text("task_name") {
            Some(task_name) => format!("Công việc {} vừa được cập nhật", task_name),
            None => "Một công việc của bạn vừa được cập nhật".to_string(),
        };

        Ok(Some(intent_for(event, user_id, recipient_type(event), content)))
    }
}

/// `task.submitted`: notifies whoever assigned the task, not the submitter.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskSubmitted;

impl NotificationRule for TaskSubmitted {
    fn name(&self) -> &'static str {
        "task_submitted"
    }

    fn build(&self, event: &ChannelEvent) -> Result<Option<NotificationIntent>, Error> {
        let Some(assigner_id) = event.id("assigner_id")? else {
            return Ok(None);
        };

        let content = match (event.text("submitter_name"), event.text("task_name")) {
            (Some(submitter), Some(task_name)) => {
                format!("{} đã nộp kết quả công việc: {}", submitter, task_name)
            }
            (None, Some(task_name)) => format!("Có kết quả mới cho công việc: {}", task_name),
            _ => "Có kết quả công việc mới được nộp".to_string(),
        };

        let user_type = event
            .text("assigner_type")
            .map(|s| UserType::from_string(&s))
            .unwrap_or(UserType::Lecturer);

        let mut intent = intent_for(event, assigner_id, user_type, content);
        if let Some(submitter_id) = event.get("user_id").filter(|v| !v.is_null()) {
            intent
                .metadata
                .insert("submitter_id".to_string(), submitter_id.clone());
        }

        Ok(Some(intent))
    }
}

/// `task.deadline_reminder`
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskDeadlineReminder;

impl NotificationRule for TaskDeadlineReminder {
    fn name(&self) -> &'static str {
        "task_deadline"
    }

    fn build(&self, event: &ChannelEvent) -> Result<Option<NotificationIntent>, Error> {
        let Some(user_id) = event.id("user_id")? else {
            return Ok(None);
        };

        let content = match (event.text("task_name"), event.text("deadline")) {
            (Some(task_name), Some(deadline)) => {
                format!("Công việc {} sắp đến hạn ({})", task_name, deadline)
            }
            (Some(task_name), None) => format!("Công việc {} sắp đến hạn", task_name),
            _ => "Bạn có công việc sắp đến hạn".to_string(),
        };

        Ok(Some(intent_for(event, user_id, recipient_type(event), content)))
    }
}
