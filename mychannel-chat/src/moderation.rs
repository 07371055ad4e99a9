//! Moderation commands.
//!
//! A command is sent to the server first and applied to the local buffer
//! only once the transport has accepted it. Inbound moderation frames go
//! through the same local-apply path, so applying an action twice (our
//! own command, then its echo) is harmless.

use crate::buffer::ModerationOutcome;
use crate::client::{ChatClient, ChatEvent, Session};
use crate::error::ChatError;
use crate::model::ModerationAction;
use crate::protocol::ChatFrame;

/// Moderation command layer over a [`ChatClient`] session.
#[derive(Clone)]
pub struct Moderator {
    client: ChatClient,
}

impl Moderator {
    pub(crate) fn new(client: ChatClient) -> Self {
        Self { client }
    }

    /// Send `action` for `message_id`, then apply it locally.
    pub async fn moderate(&self, message_id: &str, action: ModerationAction) -> Result<(), ChatError> {
        let mut s = self.client.shared.session.lock().await;
        if !s.is_connected() {
            return Err(ChatError::ConnectionFailed("Not connected to chat".to_string()));
        }

        s.transmit(&ChatFrame::moderation(message_id, action))
            .map_err(ChatError::MessageDeliveryFailed)?;

        log::info!("{} applied to message {message_id}", action.display_name());
        apply_local(&mut s, message_id, action);
        Ok(())
    }

    pub async fn delete(&self, message_id: &str) -> Result<(), ChatError> {
        self.moderate(message_id, ModerationAction::Delete).await
    }

    pub async fn highlight(&self, message_id: &str) -> Result<(), ChatError> {
        self.moderate(message_id, ModerationAction::Highlight).await
    }

    pub async fn pin(&self, message_id: &str) -> Result<(), ChatError> {
        self.moderate(message_id, ModerationAction::Pin).await
    }

    pub async fn unpin(&self, message_id: &str) -> Result<(), ChatError> {
        self.moderate(message_id, ModerationAction::Unpin).await
    }

    /// Time out the author of `message_id`.
    pub async fn timeout(&self, message_id: &str) -> Result<(), ChatError> {
        self.moderate(message_id, ModerationAction::Timeout).await
    }

    /// Ban the author of `message_id`.
    pub async fn ban(&self, message_id: &str) -> Result<(), ChatError> {
        self.moderate(message_id, ModerationAction::Ban).await
    }
}

/// Apply a moderation action to the session's buffer and notify observers.
pub(crate) fn apply_local(session: &mut Session, message_id: &str, action: ModerationAction) {
    if action == ModerationAction::Delete {
        session.remember_deleted(message_id);
    }
    match session.buffer.apply_moderation(message_id, action) {
        ModerationOutcome::Removed(removed) => {
            session.pending_acks.remove(&removed.id);
            session.emit(ChatEvent::MessageRemoved(removed.id));
        }
        ModerationOutcome::Updated(message) => {
            session.emit(ChatEvent::MessageUpdated(message));
        }
        ModerationOutcome::Unchanged => {
            log::debug!("{} on {message_id} changed nothing", action.display_name());
        }
    }
}
