//! Post-commit notification fan-out.
//!
//! Operations push a [`NewMessageJob`] onto a bounded queue after their
//! transaction commits. A single [`NotificationWorker`] drains the queue,
//! resolves recipients and hands each one to the [`NotificationService`].
//! Delivery is best-effort: a full queue drops the job, a failed delivery is
//! logged, and nothing is retried.

use std::sync::Arc;

use integrations::NotificationService;
use shared::domain::{DialogId, MessageId, UserId};
use storage::{dialogs, Storage};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessageJob {
    pub dialog_id: DialogId,
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub sender_name: String,
}

#[derive(Clone, Debug)]
pub struct NotificationQueue {
    tx: Option<mpsc::Sender<NewMessageJob>>,
}

impl NotificationQueue {
    pub fn channel(capacity: usize) -> (Self, NotificationWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, NotificationWorker { rx })
    }

    /// A queue that discards every job.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Never blocks. Returns whether the job was accepted.
    pub fn submit(&self, job: NewMessageJob) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(
                    dialog_id = %job.dialog_id,
                    message_id = %job.message_id,
                    "notification queue full; dropping job"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!(
                    dialog_id = %job.dialog_id,
                    message_id = %job.message_id,
                    "notification worker stopped; dropping job"
                );
                false
            }
        }
    }
}

pub struct NotificationWorker {
    rx: mpsc::Receiver<NewMessageJob>,
}

impl NotificationWorker {
    pub fn spawn(
        self,
        storage: Storage,
        service: Arc<dyn NotificationService>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(storage, service))
    }

    /// Runs until every [`NotificationQueue`] clone has been dropped.
    pub async fn run(mut self, storage: Storage, service: Arc<dyn NotificationService>) {
        while let Some(job) = self.rx.recv().await {
            deliver(&storage, service.as_ref(), &job).await;
        }
        debug!("notification queue closed");
    }
}

async fn deliver(storage: &Storage, service: &dyn NotificationService, job: &NewMessageJob) {
    let participants = match storage.acquire().await {
        Ok(mut conn) => dialogs::list_participants(&mut conn, job.dialog_id).await,
        Err(error) => Err(error),
    };
    let participants = match participants {
        Ok(participants) => participants,
        Err(error) => {
            warn!(dialog_id = %job.dialog_id, %error, "failed to load notification recipients");
            return;
        }
    };

    for participant in participants
        .iter()
        .filter(|p| p.user_id != job.sender_id && !p.is_muted)
    {
        if let Err(error) = service
            .create_new_message_notification(participant.user_id, &job.sender_name, job.dialog_id)
            .await
        {
            warn!(
                dialog_id = %job.dialog_id,
                recipient_id = %participant.user_id,
                %error,
                "failed to deliver new message notification"
            );
        }
    }
}

#[cfg(test)]
#[path = "tests/notify_tests.rs"]
mod tests;
