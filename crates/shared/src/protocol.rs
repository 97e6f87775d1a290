use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    CastingId, DialogId, DialogRole, MessageId, MessageStatus, MessageType, UploadId, UserId,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantView {
    pub user_id: UserId,
    pub display_name: String,
    pub role: DialogRole,
    pub is_muted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogView {
    pub dialog_id: DialogId,
    pub is_group: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub casting_id: Option<CastingId>,
    pub participants: Vec<ParticipantView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessageView>,
    pub unread_count: i64,
    pub is_muted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DialogView {
    pub fn participant(&self, user_id: UserId) -> Option<&ParticipantView> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionView {
    pub user_id: UserId,
    pub user_name: String,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentView {
    pub upload_id: UploadId,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub size_bytes: u64,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub message_id: MessageId,
    pub dialog_id: DialogId,
    /// `None` for system messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    pub sender_name: String,
    pub message_type: MessageType,
    pub content: String,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Box<MessageView>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded_from: Option<Box<MessageView>>,
    #[serde(default)]
    pub reactions: Vec<ReactionView>,
    #[serde(default)]
    pub attachments: Vec<AttachmentView>,
    #[serde(default)]
    pub read_by: Vec<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogWithMessages {
    pub dialog: DialogView,
    pub messages: Vec<MessageView>,
}
