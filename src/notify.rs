use crate::directory::Recipient;
use crate::models::{NotificationKind, NotificationRecord, Priority, ReadState};
use crate::push::{NEW_NOTIFICATION_EVENT, PRIVATE_CHANNEL_PREFIX, PushGateway};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::{sync::RwLock, task::JoinSet};
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification write failed: {0}")]
    Persistence(String),
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    pub priority: Priority,
}

/// Persistence capability for notification rows.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn create(&self, notification: NewNotification)
    -> Result<NotificationRecord, NotifyError>;
}

/// In-process notification log.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationLog {
    rows: Arc<RwLock<Vec<NotificationRecord>>>,
}

impl InMemoryNotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<NotificationRecord> {
        self.rows.read().await.clone()
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotificationLog {
    async fn create(
        &self,
        notification: NewNotification,
    ) -> Result<NotificationRecord, NotifyError> {
        let record = NotificationRecord {
            id: Uuid::new_v4(),
            user_id: notification.user_id,
            kind: notification.kind,
            message: notification.message,
            priority: notification.priority,
            status: ReadState::Unread,
            created_at: Utc::now(),
        };
        self.rows.write().await.push(record.clone());
        Ok(record)
    }
}

/// One queued unit of background work: notify every recipient of the snapshot
/// about a newly created listing. Lives only in process memory.
#[derive(Debug, Clone)]
pub struct FanoutJob {
    pub listing_id: Uuid,
    pub make: String,
    pub model: String,
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FanoutReport {
    pub attempted: usize,
    pub persisted: usize,
    pub pushed: usize,
}

pub fn notification_message(make: &str, model: &str, year: Option<i32>) -> String {
    let make = if make.is_empty() { "Unknown Make" } else { make };
    let year = year
        .map(|y| y.to_string())
        .unwrap_or_else(|| "Unknown Year".to_string());
    format!("New car listed: {make} {model} ({year})")
}

pub fn channel_for(recipient: Uuid) -> String {
    format!("{PRIVATE_CHANNEL_PREFIX}{recipient}")
}

/// Deliver one new-listing event to every recipient of the snapshot.
///
/// Per recipient: persist the row, then push to the private channel. A push
/// failure is logged and does not undo the row; a persistence failure is
/// logged and skips that recipient. Attempts run concurrently and are all
/// waited for; the fan-out itself never fails.
pub async fn fan_out(
    job: &FanoutJob,
    recipients: &Arc<Vec<Recipient>>,
    sink: &Arc<dyn NotificationSink>,
    push: &Arc<dyn PushGateway>,
) -> FanoutReport {
    if recipients.is_empty() {
        return FanoutReport::default();
    }

    let message = notification_message(&job.make, &job.model, job.year);
    let mut attempts = JoinSet::new();
    for recipient in recipients.iter() {
        let recipient_id = recipient.id;
        let listing_id = job.listing_id;
        let message = message.clone();
        let sink = sink.clone();
        let push = push.clone();
        attempts.spawn(async move {
            let record = match sink
                .create(NewNotification {
                    user_id: recipient_id,
                    kind: NotificationKind::Alert,
                    message: message.clone(),
                    priority: Priority::Normal,
                })
                .await
            {
                Ok(record) => record,
                Err(err) => {
                    error!(
                        target = "autolist.notify",
                        recipient = %recipient_id,
                        listing = %listing_id,
                        error = %err,
                        "notification_create_failed",
                    );
                    return (false, false);
                }
            };

            let payload = json!({
                "notificationId": record.id,
                "title": "New Car Added",
                "message": message,
                "createdAt": record.created_at,
                "carId": listing_id,
            });
            match push
                .trigger(&channel_for(recipient_id), NEW_NOTIFICATION_EVENT, payload)
                .await
            {
                Ok(()) => (true, true),
                Err(err) => {
                    warn!(
                        target = "autolist.notify",
                        recipient = %recipient_id,
                        listing = %listing_id,
                        error = %err,
                        "push_trigger_failed",
                    );
                    (true, false)
                }
            }
        });
    }

    let mut report = FanoutReport {
        attempted: recipients.len(),
        ..Default::default()
    };
    while let Some(settled) = attempts.join_next().await {
        match settled {
            Ok((persisted, pushed)) => {
                report.persisted += usize::from(persisted);
                report.pushed += usize::from(pushed);
            }
            Err(err) => {
                error!(
                    target = "autolist.notify",
                    listing = %job.listing_id,
                    error = %err,
                    "fanout_attempt_panicked",
                );
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{AccountStatus, Role};
    use crate::push::PushError;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recipients(n: usize) -> Arc<Vec<Recipient>> {
        Arc::new(
            (0..n)
                .map(|i| Recipient {
                    id: Uuid::new_v4(),
                    name: format!("user-{i}"),
                    email: format!("user-{i}@example.com"),
                    role: Role::User,
                    status: AccountStatus::Active,
                })
                .collect(),
        )
    }

    fn job() -> FanoutJob {
        FanoutJob {
            listing_id: Uuid::new_v4(),
            make: "BMW".to_string(),
            model: "320i".to_string(),
            year: Some(2019),
        }
    }

    struct CountingPush {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl PushGateway for CountingPush {
        async fn trigger(&self, _: &str, _: &str, _: Value) -> Result<(), PushError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FlakyPush {
        fail_channel: String,
        sent: AtomicUsize,
    }

    #[async_trait]
    impl PushGateway for FlakyPush {
        async fn trigger(&self, channel: &str, _: &str, _: Value) -> Result<(), PushError> {
            if channel == self.fail_channel {
                return Err(PushError::Status(500));
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        async fn create(&self, _: NewNotification) -> Result<NotificationRecord, NotifyError> {
            Err(NotifyError::Persistence("disk full".to_string()))
        }
    }

    #[test]
    fn message_defaults_absent_fields() {
        assert_eq!(
            notification_message("", "", None),
            "New car listed: Unknown Make  (Unknown Year)"
        );
        assert_eq!(
            notification_message("BMW", "320i", Some(2019)),
            "New car listed: BMW 320i (2019)"
        );
    }

    #[tokio::test]
    async fn delivers_one_row_and_push_per_recipient() {
        let recipients = recipients(3);
        let log = InMemoryNotificationLog::new();
        let sink: Arc<dyn NotificationSink> = Arc::new(log.clone());
        let push = Arc::new(CountingPush {
            sent: AtomicUsize::new(0),
        });
        let gateway: Arc<dyn PushGateway> = push.clone();

        let report = fan_out(&job(), &recipients, &sink, &gateway).await;
        assert_eq!(report.attempted, 3);
        assert_eq!(report.persisted, 3);
        assert_eq!(report.pushed, 3);
        assert_eq!(log.all().await.len(), 3);
        assert_eq!(push.sent.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn one_push_failure_leaves_other_recipients_untouched() {
        let recipients = recipients(3);
        let log = InMemoryNotificationLog::new();
        let sink: Arc<dyn NotificationSink> = Arc::new(log.clone());
        let push = Arc::new(FlakyPush {
            fail_channel: channel_for(recipients[0].id),
            sent: AtomicUsize::new(0),
        });
        let gateway: Arc<dyn PushGateway> = push.clone();

        let report = fan_out(&job(), &recipients, &sink, &gateway).await;
        assert_eq!(report.persisted, 3);
        assert_eq!(report.pushed, 2);
        // the failed push does not undo the persisted row
        assert_eq!(log.all().await.len(), 3);
    }

    #[tokio::test]
    async fn persistence_failure_skips_recipient_without_raising() {
        let recipients = recipients(2);
        let sink: Arc<dyn NotificationSink> = Arc::new(FailingSink);
        let push = Arc::new(CountingPush {
            sent: AtomicUsize::new(0),
        });
        let gateway: Arc<dyn PushGateway> = push.clone();

        let report = fan_out(&job(), &recipients, &sink, &gateway).await;
        assert_eq!(report.attempted, 2);
        assert_eq!(report.persisted, 0);
        assert_eq!(report.pushed, 0);
        assert_eq!(push.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_snapshot_is_a_no_op() {
        let log = InMemoryNotificationLog::new();
        let sink: Arc<dyn NotificationSink> = Arc::new(log.clone());
        let gateway: Arc<dyn PushGateway> = Arc::new(crate::push::NoopPush);
        let report = fan_out(&job(), &Arc::new(Vec::new()), &sink, &gateway).await;
        assert_eq!(report.attempted, 0);
        assert!(log.all().await.is_empty());
    }

    #[tokio::test]
    async fn notification_rows_carry_alert_defaults() {
        let recipients = recipients(1);
        let log = InMemoryNotificationLog::new();
        let sink: Arc<dyn NotificationSink> = Arc::new(log.clone());
        let gateway: Arc<dyn PushGateway> = Arc::new(crate::push::NoopPush);
        fan_out(&job(), &recipients, &sink, &gateway).await;

        let rows = log.all().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, NotificationKind::Alert);
        assert_eq!(rows[0].priority, Priority::Normal);
        assert_eq!(rows[0].status, ReadState::Unread);
        assert_eq!(rows[0].user_id, recipients[0].id);
        assert_eq!(rows[0].message, "New car listed: BMW 320i (2019)");
    }
}
