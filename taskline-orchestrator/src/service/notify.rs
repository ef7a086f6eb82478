//! Notify Service
//!
//! Task status notifications. The scheduler reports every status change
//! here, and approval jobs report when they start waiting for votes; the
//! service decides per notify setting whether to send and hands the payload
//! to a `Notifier` in the background.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use taskline_core::domain::status::Status;
use taskline_core::domain::task::WorkflowTask;
use taskline_core::domain::workflow::{NotifyCtl, NotifyType};

use crate::repository::TaskStore;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("no webhook address configured")]
    NoAddress,

    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Task,
    Approval,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub name: String,
    pub status: Status,
}

/// Structured payload sent to webhooks
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub workflow_name: String,
    pub workflow_display_name: String,
    pub project: String,
    pub task_id: i64,
    pub status: Status,
    pub creator: String,
    /// Approval job waiting for votes, when the task itself is running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stages: Vec<StageSummary>,
}

impl Notification {
    pub fn for_task(task: &WorkflowTask) -> Self {
        let kind = if task.status == Status::WaitingApprove {
            NotificationKind::Approval
        } else {
            NotificationKind::Task
        };
        Self {
            kind,
            workflow_name: task.workflow_name.clone(),
            workflow_display_name: task.workflow_display_name.clone(),
            project: task.project.clone(),
            task_id: task.task_id,
            status: task.status,
            creator: task.creator.clone(),
            job_name: None,
            error: task.error.clone(),
            stages: task
                .stages
                .iter()
                .map(|s| StageSummary {
                    name: s.name.clone(),
                    status: s.status,
                })
                .collect(),
        }
    }

    /// Approval request for a job of a running task
    pub fn for_approval_job(task: &WorkflowTask, job_name: &str) -> Self {
        Self {
            kind: NotificationKind::Approval,
            status: Status::WaitingApprove,
            job_name: Some(job_name.to_string()),
            ..Self::for_task(task)
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, ctl: &NotifyCtl, notification: &Notification) -> Result<(), NotifyError>;
}

/// Posts the notification as JSON to the setting's webhook, or to the
/// fallback address when the setting has none
pub struct WebhookNotifier {
    client: reqwest::Client,
    fallback_url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(fallback_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            fallback_url,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, ctl: &NotifyCtl, notification: &Notification) -> Result<(), NotifyError> {
        let url = if ctl.webhook_url.is_empty() {
            self.fallback_url.as_deref().ok_or(NotifyError::NoAddress)?
        } else {
            ctl.webhook_url.as_str()
        };
        self.client
            .post(url)
            .json(notification)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Whether a status change is worth a notification for this setting
pub fn should_notify(ctl: &NotifyCtl, status: Status, previous: Option<Status>) -> bool {
    if !ctl.enabled {
        return false;
    }
    if ctl.notify_types.iter().any(|t| t.matches(status)) {
        return true;
    }
    ctl.notify_types.contains(&NotifyType::Changed)
        && !matches!(status, Status::Running | Status::Created)
        && previous != Some(status)
}

#[derive(Clone)]
pub struct NotifyService {
    notifier: Arc<dyn Notifier>,
    tasks: Arc<dyn TaskStore>,
}

impl NotifyService {
    pub fn new(notifier: Arc<dyn Notifier>, tasks: Arc<dyn TaskStore>) -> Self {
        Self { notifier, tasks }
    }

    /// Sends the notifications a task's current status calls for, without
    /// waiting for them
    pub fn status_changed(&self, task: &WorkflowTask) {
        if !task.notify_ctls.iter().any(|ctl| ctl.enabled) {
            return;
        }
        let this = self.clone();
        let task = task.clone();
        tokio::spawn(async move { this.deliver(&task).await });
    }

    /// Sends an approval request for a job that started waiting for votes
    pub fn approval_requested(&self, task: &WorkflowTask, job_name: &str) {
        if !task.notify_ctls.iter().any(|ctl| ctl.enabled) {
            return;
        }
        let this = self.clone();
        let task = task.clone();
        let job_name = job_name.to_string();
        tokio::spawn(async move { this.deliver_approval(&task, &job_name).await });
    }

    async fn deliver_approval(&self, task: &WorkflowTask, job_name: &str) {
        let notification = Notification::for_approval_job(task, job_name);
        for ctl in &task.notify_ctls {
            if !ctl.enabled || !ctl.notify_types.iter().any(|t| t.matches(Status::WaitingApprove)) {
                continue;
            }
            if let Err(e) = self.notifier.send(ctl, &notification).await {
                tracing::warn!(
                    "Failed to send approval request for {} of {}#{}: {}",
                    job_name,
                    task.workflow_name,
                    task.task_id,
                    e
                );
            }
        }
    }

    async fn deliver(&self, task: &WorkflowTask) {
        let previous = if task.task_id > 1 {
            match self.tasks.find_task(&task.workflow_name, task.task_id - 1).await {
                Ok(found) => found.map(|t| t.status),
                Err(e) => {
                    tracing::warn!("Failed to load previous task of {}: {}", task.workflow_name, e);
                    None
                }
            }
        } else {
            None
        };

        let notification = Notification::for_task(task);
        for ctl in &task.notify_ctls {
            if !should_notify(ctl, task.status, previous) {
                continue;
            }
            if let Err(e) = self.notifier.send(ctl, &notification).await {
                tracing::warn!(
                    "Failed to notify {}#{} ({}): {}",
                    task.workflow_name,
                    task.task_id,
                    task.status,
                    e
                );
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::controller::fakes::task_with;
    use crate::repository::MemoryStore;

    /// Records what it was asked to send
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub sent: Mutex<Vec<(NotificationKind, Status)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, _ctl: &NotifyCtl, n: &Notification) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push((n.kind, n.status));
            Ok(())
        }
    }

    fn ctl(types: &[NotifyType]) -> NotifyCtl {
        NotifyCtl {
            enabled: true,
            webhook_type: "webhook".to_string(),
            webhook_url: String::new(),
            notify_types: types.to_vec(),
        }
    }

    #[test]
    fn test_listed_status_notifies() {
        let ctl = ctl(&[NotifyType::Failed]);
        assert!(should_notify(&ctl, Status::Failed, Some(Status::Failed)));
        assert!(!should_notify(&ctl, Status::Passed, Some(Status::Failed)));
    }

    #[test]
    fn test_changed_compares_with_previous_task() {
        let ctl = ctl(&[NotifyType::Changed]);
        assert!(should_notify(&ctl, Status::Passed, Some(Status::Failed)));
        assert!(!should_notify(&ctl, Status::Passed, Some(Status::Passed)));
        assert!(!should_notify(&ctl, Status::Running, Some(Status::Passed)));
    }

    #[test]
    fn test_disabled_setting_never_notifies() {
        let mut ctl = ctl(&[NotifyType::Failed]);
        ctl.enabled = false;
        assert!(!should_notify(&ctl, Status::Failed, None));
    }

    #[tokio::test]
    async fn test_waiting_approve_sends_approval_notification() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let service = NotifyService::new(notifier.clone(), store);

        let mut task = task_with(vec![]);
        task.status = Status::WaitingApprove;
        task.notify_ctls = vec![ctl(&[NotifyType::WaitingApprove])];
        service.deliver(&task).await;

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(*sent, vec![(NotificationKind::Approval, Status::WaitingApprove)]);
    }

    #[tokio::test]
    async fn test_approval_job_request_needs_waiting_approve_type() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let service = NotifyService::new(notifier.clone(), store);

        let mut task = task_with(vec![]);
        task.status = Status::Running;
        task.notify_ctls = vec![ctl(&[NotifyType::Changed]), ctl(&[NotifyType::WaitingApprove])];
        service.deliver_approval(&task, "approve").await;

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(*sent, vec![(NotificationKind::Approval, Status::WaitingApprove)]);
    }
}
