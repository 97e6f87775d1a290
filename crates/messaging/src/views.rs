//! Projection of stored rows into client-facing views.
//!
//! Read-only. Display names are cached per builder so one response never
//! resolves the same user twice.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use futures::future::BoxFuture;
use shared::{
    domain::{MessageId, MessageSender, UserId, SYSTEM_SENDER_NAME},
    error::ApiError,
    protocol::{AttachmentView, DialogView, MessageView, ParticipantView, ReactionView},
};
use sqlx::SqliteConnection;
use storage::{dialogs, messages, StoredDialog, StoredMessage, StoredParticipant};

use crate::{attachments, internal, MessagingContext};

pub(crate) struct ViewBuilder<'a> {
    ctx: &'a MessagingContext,
    names: HashMap<UserId, String>,
}

impl<'a> ViewBuilder<'a> {
    pub(crate) fn new(ctx: &'a MessagingContext) -> Self {
        Self {
            ctx,
            names: HashMap::new(),
        }
    }

    pub(crate) async fn display_name(
        &mut self,
        conn: &mut SqliteConnection,
        user_id: UserId,
    ) -> Result<String, ApiError> {
        if let Some(name) = self.names.get(&user_id) {
            return Ok(name.clone());
        }
        let user = self
            .ctx
            .users
            .find_by_id(conn, user_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| ApiError::not_found(format!("user {user_id} not found")))?;
        self.names.insert(user_id, user.display_name.clone());
        Ok(user.display_name)
    }

    async fn sender_name(
        &mut self,
        conn: &mut SqliteConnection,
        sender: MessageSender,
    ) -> Result<String, ApiError> {
        match sender {
            MessageSender::System => Ok(SYSTEM_SENDER_NAME.to_string()),
            MessageSender::User(user_id) => self.display_name(conn, user_id).await,
        }
    }

    pub(crate) async fn participant_views(
        &mut self,
        conn: &mut SqliteConnection,
        participants: &[StoredParticipant],
    ) -> Result<Vec<ParticipantView>, ApiError> {
        let now = Utc::now();
        let mut views = Vec::with_capacity(participants.len());
        for participant in participants {
            views.push(ParticipantView {
                user_id: participant.user_id,
                display_name: self.display_name(conn, participant.user_id).await?,
                role: participant.role,
                is_muted: participant.is_muted,
                last_seen_at: participant.last_seen_at,
                is_typing: participant.is_typing_at(now),
            });
        }
        Ok(views)
    }

    /// The dialog as `viewer` sees it: their mute flag and unread count.
    pub(crate) async fn dialog_view(
        &mut self,
        conn: &mut SqliteConnection,
        dialog: &StoredDialog,
        viewer: UserId,
    ) -> Result<DialogView, ApiError> {
        let participants = dialogs::list_participants(conn, dialog.dialog_id)
            .await
            .map_err(internal)?;
        let is_muted = participants
            .iter()
            .find(|p| p.user_id == viewer)
            .is_some_and(|p| p.is_muted);
        let participant_views = self.participant_views(conn, &participants).await?;

        let last_message = match messages::latest_message(conn, dialog.dialog_id)
            .await
            .map_err(internal)?
        {
            Some(message) => Some(self.message_view(conn, message).await?),
            None => None,
        };
        let unread_count = messages::count_unread(conn, dialog.dialog_id, viewer)
            .await
            .map_err(internal)?;

        Ok(DialogView {
            dialog_id: dialog.dialog_id,
            is_group: dialog.is_group,
            title: dialog.title.clone(),
            image_url: dialog.image_url.clone(),
            casting_id: dialog.casting_id,
            participants: participant_views,
            last_message,
            unread_count,
            is_muted,
            created_at: dialog.created_at,
            updated_at: dialog.updated_at,
        })
    }

    pub(crate) async fn message_view(
        &mut self,
        conn: &mut SqliteConnection,
        message: StoredMessage,
    ) -> Result<MessageView, ApiError> {
        let mut visited = HashSet::new();
        self.message_view_at(conn, message, 0, &mut visited).await
    }

    /// Builds views for a page of messages, dropping any that fail to project.
    pub(crate) async fn message_views(
        &mut self,
        conn: &mut SqliteConnection,
        messages: Vec<StoredMessage>,
    ) -> Vec<MessageView> {
        let mut views = Vec::with_capacity(messages.len());
        for message in messages {
            let message_id = message.message_id;
            match self.message_view(conn, message).await {
                Ok(view) => views.push(view),
                Err(error) => {
                    tracing::warn!(%message_id, %error, "skipping message that failed to build");
                }
            }
        }
        views
    }

    /// Reply and forward references are followed to at most
    /// `max_reference_depth` levels; a message already on the current path is
    /// never expanded twice.
    fn message_view_at<'s>(
        &'s mut self,
        conn: &'s mut SqliteConnection,
        message: StoredMessage,
        depth: usize,
        visited: &'s mut HashSet<MessageId>,
    ) -> BoxFuture<'s, Result<MessageView, ApiError>> {
        Box::pin(async move {
            visited.insert(message.message_id);
            let can_expand = depth < self.ctx.config.max_reference_depth;

            let reply_to = match message.reply_to_id {
                Some(id) if can_expand && !visited.contains(&id) => {
                    match messages::find_message(conn, id).await.map_err(internal)? {
                        Some(target) => Some(Box::new(
                            self.message_view_at(conn, target, depth + 1, visited).await?,
                        )),
                        None => None,
                    }
                }
                _ => None,
            };
            let forwarded_from = match message.forward_from_id {
                Some(id) if can_expand && !visited.contains(&id) => {
                    match messages::find_message(conn, id).await.map_err(internal)? {
                        Some(target) => Some(Box::new(
                            self.message_view_at(conn, target, depth + 1, visited).await?,
                        )),
                        None => None,
                    }
                }
                _ => None,
            };

            let sender_name = self.sender_name(conn, message.sender).await?;
            let reactions = self.reaction_views(conn, message.message_id).await?;
            let attachments = attachments::attachment_views(self.ctx, conn, message.message_id).await?;
            let read_by = messages::list_readers(conn, message.message_id)
                .await
                .map_err(internal)?;

            visited.remove(&message.message_id);
            Ok(MessageView {
                message_id: message.message_id,
                dialog_id: message.dialog_id,
                sender_id: message.sender.user_id(),
                sender_name,
                message_type: message.message_type,
                content: message.content,
                status: message.status,
                reply_to,
                forwarded_from,
                reactions,
                attachments,
                read_by,
                created_at: message.created_at,
                updated_at: message.updated_at,
            })
        })
    }

    async fn reaction_views(
        &mut self,
        conn: &mut SqliteConnection,
        message_id: MessageId,
    ) -> Result<Vec<ReactionView>, ApiError> {
        let reactions = messages::list_reactions(conn, message_id)
            .await
            .map_err(internal)?;
        let mut views = Vec::with_capacity(reactions.len());
        for reaction in reactions {
            views.push(ReactionView {
                user_id: reaction.user_id,
                user_name: self.display_name(conn, reaction.user_id).await?,
                emoji: reaction.emoji,
                created_at: reaction.created_at,
            });
        }
        Ok(views)
    }
}

pub(crate) fn attachment_view(record: &integrations::UploadRecord) -> AttachmentView {
    AttachmentView {
        upload_id: record.upload_id,
        filename: record.filename.clone(),
        mime_type: record.mime_type.clone(),
        size_bytes: record.size_bytes,
        url: record.url(),
    }
}

#[cfg(test)]
#[path = "tests/views_tests.rs"]
mod tests;
