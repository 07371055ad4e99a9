//! JSON envelope for chat frames.
//!
//! Wire format:
//! ```text
//! { "type": "<kind>", "data": <payload> }
//!
//! chat_message       ChatMessage
//! user_joined        ChatUser
//! user_left          "<userId>"
//! statistics_update  ChatStatistics
//! settings_update    ChatSettings
//! moderation_action  { "messageId": "...", "action": "delete|highlight|pin|unpin|timeout|ban" }
//! heartbeat          (no data)
//! ```
//!
//! Frames are decoded straight into [`ChatFrame`]; anything that does not
//! match one of the kinds above is rejected at the boundary.

use serde::{Deserialize, Serialize};

use crate::model::{ChatMessage, ChatSettings, ChatStatistics, ChatUser, ModerationAction};

/// Payload of a `moderation_action` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationCommand {
    pub message_id: String,
    pub action: ModerationAction,
}

/// One frame exchanged over the chat connection.
///
/// The same envelope is used in both directions: the server pushes every
/// kind, the client sends `chat_message`, `moderation_action`,
/// `settings_update` and `heartbeat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChatFrame {
    ChatMessage(ChatMessage),
    UserJoined(ChatUser),
    UserLeft(String),
    StatisticsUpdate(ChatStatistics),
    SettingsUpdate(ChatSettings),
    ModerationAction(ModerationCommand),
    Heartbeat,
}

/// Frames received from the server.
pub type InboundEvent = ChatFrame;

impl ChatFrame {
    pub fn moderation(message_id: impl Into<String>, action: ModerationAction) -> Self {
        Self::ModerationAction(ModerationCommand {
            message_id: message_id.into(),
            action,
        })
    }

    /// Wire name of this frame's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChatMessage(_) => "chat_message",
            Self::UserJoined(_) => "user_joined",
            Self::UserLeft(_) => "user_left",
            Self::StatisticsUpdate(_) => "statistics_update",
            Self::SettingsUpdate(_) => "settings_update",
            Self::ModerationAction(_) => "moderation_action",
            Self::Heartbeat => "heartbeat",
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Parse a JSON text frame.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(ProtocolError::Decode)
    }

    /// Parse a binary frame carrying UTF-8 JSON.
    pub fn decode_bytes(raw: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(raw).map_err(ProtocolError::Decode)
    }
}

/// Frame codec errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Deserialization error: {0}")]
    Decode(#[source] serde_json::Error),
}
