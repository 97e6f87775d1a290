use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(DialogId);
id_newtype!(MessageId);
id_newtype!(CastingId);
id_newtype!(UploadId);
id_newtype!(NotificationId);

/// Display name used for messages authored by [`MessageSender::System`].
pub const SYSTEM_SENDER_NAME: &str = "System";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogRole {
    Owner,
    Admin,
    Member,
}

impl DialogRole {
    pub fn as_str(self) -> &'static str {
        match self {
            DialogRole::Owner => "owner",
            DialogRole::Admin => "admin",
            DialogRole::Member => "member",
        }
    }

    /// Owners and admins may manage membership and dialog metadata.
    pub fn can_moderate(self) -> bool {
        matches!(self, DialogRole::Owner | DialogRole::Admin)
    }
}

impl FromStr for DialogRole {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "owner" => Ok(DialogRole::Owner),
            "admin" => Ok(DialogRole::Admin),
            "member" => Ok(DialogRole::Member),
            other => Err(UnknownVariant::new("dialog role", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Video,
    File,
    System,
    Forward,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Video => "video",
            MessageType::File => "file",
            MessageType::System => "system",
            MessageType::Forward => "forward",
        }
    }
}

impl FromStr for MessageType {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "video" => Ok(MessageType::Video),
            "file" => Ok(MessageType::File),
            "system" => Ok(MessageType::System),
            "forward" => Ok(MessageType::Forward),
            other => Err(UnknownVariant::new("message type", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Edited,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Edited => "edited",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sent" => Ok(MessageStatus::Sent),
            "edited" => Ok(MessageStatus::Edited),
            other => Err(UnknownVariant::new("message status", other)),
        }
    }
}

/// Author of a message. System messages have no backing user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSender {
    System,
    User(UserId),
}

impl MessageSender {
    pub fn user_id(self) -> Option<UserId> {
        match self {
            MessageSender::System => None,
            MessageSender::User(user_id) => Some(user_id),
        }
    }

    pub fn is(self, user_id: UserId) -> bool {
        self.user_id() == Some(user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_rejects_unknown_values() {
        let err = "sticker".parse::<MessageType>().expect_err("unknown type");
        assert_eq!(err.to_string(), "unknown message type 'sticker'");
        assert_eq!("forward".parse::<MessageType>(), Ok(MessageType::Forward));
    }

    #[test]
    fn only_owner_and_admin_moderate() {
        assert!(DialogRole::Owner.can_moderate());
        assert!(DialogRole::Admin.can_moderate());
        assert!(!DialogRole::Member.can_moderate());
    }

    #[test]
    fn system_sender_matches_no_user() {
        assert!(!MessageSender::System.is(UserId(1)));
        assert!(MessageSender::User(UserId(1)).is(UserId(1)));
    }
}
