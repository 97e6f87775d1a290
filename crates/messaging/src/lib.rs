//! Dialog, participant and message engine for the marketplace chat.
//!
//! Every operation is a free function taking a [`MessagingContext`]. Access is
//! resolved before any state is touched; multi-row writes run inside a single
//! SQLite transaction; notification fan-out is queued only after commit.

use std::sync::Arc;

use integrations::{CastingDirectory, UploadService, UserDirectory};
use shared::error::ApiError;
use storage::Storage;

pub mod access;
pub mod attachments;
pub mod config;
pub mod dialogs;
pub mod messages;
pub mod notify;
pub mod participants;
pub mod reactions;
pub mod receipts;
mod views;

pub use access::{get_participant, is_member};
pub use attachments::get_attachments;
pub use config::{AttachmentPolicy, MessagingConfig};
pub use dialogs::{
    create_casting_dialog, create_dialog, delete_dialog, get_dialog, get_dialog_between_users,
    get_dialog_with_messages, get_user_dialogs, leave_dialog, update_dialog, CreateDialogRequest,
    DialogUpdate,
};
pub use messages::{
    delete_message, forward_message, get_message, get_messages, parse_message_type,
    search_messages, send_message, send_message_with_attachments, update_message,
    SendMessageRequest,
};
pub use notify::{NewMessageJob, NotificationQueue, NotificationWorker};
pub use participants::{
    add_participants, list_participants, mute_dialog, remove_participant, set_typing,
    transfer_ownership, update_last_seen, update_participant_role,
};
pub use reactions::{add_reaction, remove_reaction};
pub use receipts::{get_total_unread_count, get_unread_count, mark_messages_as_read};

#[derive(Clone)]
pub struct MessagingContext {
    pub storage: Storage,
    pub users: Arc<dyn UserDirectory>,
    pub castings: Arc<dyn CastingDirectory>,
    pub uploads: Arc<dyn UploadService>,
    pub notifications: NotificationQueue,
    pub config: Arc<MessagingConfig>,
}

impl MessagingContext {
    /// Wires every collaborator to the SQLite-backed implementations in
    /// `storage`.
    pub fn with_storage(
        storage: Storage,
        notifications: NotificationQueue,
        config: MessagingConfig,
    ) -> Self {
        Self {
            users: Arc::new(storage.clone()),
            castings: Arc::new(storage.clone()),
            uploads: Arc::new(storage.clone()),
            storage,
            notifications,
            config: Arc::new(config),
        }
    }
}

pub(crate) fn internal(err: impl Into<anyhow::Error>) -> ApiError {
    ApiError::internal(format!("{:#}", err.into()))
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
