//! Chat domain records shared by the wire protocol and the session core.
//!
//! Field names follow the backend's JSON (camelCase). Timestamps are Unix
//! epoch milliseconds.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Current wall-clock time as Unix epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ───────────────────────────────────────────────────────────────────
// Messages
// ───────────────────────────────────────────────────────────────────

/// Kind of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    #[serde(alias = "regular")]
    Text,
    SuperChat,
    System,
    Membership,
    Moderator,
    Announcement,
    Poll,
    Celebration,
}

/// Badge shown next to a username.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBadge {
    pub id: String,
    pub name: String,
    pub icon_name: String,
    /// Hex color without the leading `#`.
    pub color: String,
    pub description: String,
}

impl UserBadge {
    pub fn new(
        name: impl Into<String>,
        icon_name: impl Into<String>,
        color: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            icon_name: icon_name.into(),
            color: color.into(),
            description: description.into(),
        }
    }
}

/// Inline emote referenced by a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEmote {
    pub id: String,
    pub name: String,
    #[serde(rename = "imageURL")]
    pub image_url: String,
    #[serde(default)]
    pub is_animated: bool,
    #[serde(default)]
    pub is_premium: bool,
}

/// A single chat message.
///
/// Messages are treated as immutable: moderation produces a replacement
/// record with the same `id` rather than mutating a shared one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub stream_id: String,
    pub user_id: String,
    pub username: String,
    #[serde(rename = "userAvatarURL", default, skip_serializing_if = "Option::is_none")]
    pub user_avatar_url: Option<String>,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    pub timestamp: u64,
    #[serde(default)]
    pub is_highlighted: bool,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub is_moderated: bool,
    #[serde(default)]
    pub badges: Vec<UserBadge>,
    #[serde(default)]
    pub emotes: Vec<ChatEmote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub super_chat_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,
}

impl ChatMessage {
    /// Create a plain text message with a fresh id and the current time.
    pub fn new(
        stream_id: impl Into<String>,
        user_id: impl Into<String>,
        username: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            stream_id: stream_id.into(),
            user_id: user_id.into(),
            username: username.into(),
            user_avatar_url: None,
            content: content.into(),
            message_type: MessageType::Text,
            timestamp: now_millis(),
            is_highlighted: false,
            is_pinned: false,
            is_moderated: false,
            badges: Vec::new(),
            emotes: Vec::new(),
            super_chat_amount: None,
            reply_to_message_id: None,
        }
    }

    /// Create a super chat. Super chats are highlighted from construction.
    pub fn super_chat(
        stream_id: impl Into<String>,
        user_id: impl Into<String>,
        username: impl Into<String>,
        content: impl Into<String>,
        amount: f64,
    ) -> Self {
        Self {
            message_type: MessageType::SuperChat,
            is_highlighted: true,
            super_chat_amount: Some(amount),
            ..Self::new(stream_id, user_id, username, content)
        }
    }

    /// Set the reply target.
    pub fn replying_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to_message_id = Some(message_id.into());
        self
    }

    /// Set the author's avatar.
    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.user_avatar_url = Some(url.into());
        self
    }

    pub fn is_reply(&self) -> bool {
        self.reply_to_message_id.is_some()
    }

    pub fn is_super_chat(&self) -> bool {
        self.message_type == MessageType::SuperChat
    }

    /// Copy with the highlight flag set.
    pub fn highlighted(&self) -> Self {
        Self { is_highlighted: true, ..self.clone() }
    }

    /// Copy with the pin flag set to `pinned`.
    pub fn pinned(&self, pinned: bool) -> Self {
        Self { is_pinned: pinned, ..self.clone() }
    }

    /// Copy marked as moderated.
    pub fn moderated(&self) -> Self {
        Self { is_moderated: true, ..self.clone() }
    }
}

// ───────────────────────────────────────────────────────────────────
// Users
// ───────────────────────────────────────────────────────────────────

/// A viewer present in the chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUser {
    pub id: String,
    pub username: String,
    pub display_name: String,
    #[serde(rename = "avatarURL", default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_subscriber: bool,
    #[serde(default)]
    pub is_moderator: bool,
    #[serde(rename = "isVIP", default)]
    pub is_vip: bool,
    #[serde(default)]
    pub is_streamer: bool,
    pub joined_at: u64,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub badges: Vec<UserBadge>,
}

impl ChatUser {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            id: id.into(),
            display_name: username.clone(),
            username,
            avatar_url: None,
            is_subscriber: false,
            is_moderator: false,
            is_vip: false,
            is_streamer: false,
            joined_at: now_millis(),
            message_count: 0,
            badges: Vec::new(),
        }
    }

    /// Explicit badges followed by the ones implied by the user's roles.
    pub fn role_badges(&self) -> Vec<UserBadge> {
        let mut badges = self.badges.clone();
        if self.is_streamer {
            badges.push(UserBadge::new("Streamer", "crown.fill", "FFD700", "Channel Owner"));
        }
        if self.is_moderator {
            badges.push(UserBadge::new("Moderator", "shield.fill", "FF4444", "Chat Moderator"));
        }
        if self.is_vip {
            badges.push(UserBadge::new("VIP", "star.fill", "9146FF", "VIP Member"));
        }
        if self.is_subscriber {
            badges.push(UserBadge::new("Subscriber", "heart.fill", "00FF7F", "Channel Subscriber"));
        }
        badges
    }
}

// ───────────────────────────────────────────────────────────────────
// Stream-level state
// ───────────────────────────────────────────────────────────────────

/// Aggregate chat statistics for one stream session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatStatistics {
    pub active_users: u64,
    pub total_messages: u64,
    pub messages_per_minute: f64,
    /// User ids, most active first.
    pub top_chatters: Vec<String>,
    /// Emote names, most used first.
    pub popular_emotes: Vec<String>,
    pub super_chat_total: f64,
    pub super_chat_revenue: f64,
    pub peak_viewers: u64,
}

/// Per-stream chat settings. Replaced wholesale on every server push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    pub is_slow_mode: bool,
    /// Seconds between two messages from the same user in slow mode.
    pub slow_mode_delay: u64,
    pub is_subscriber_only: bool,
    pub is_emote_only: bool,
    pub is_follower_only: bool,
    /// Minutes a user must have followed.
    pub follower_only_duration: u64,
    pub max_message_length: usize,
    pub is_profanity_filter_enabled: bool,
    pub banned_words: Vec<String>,
    pub allowed_emotes: Vec<String>,
    pub super_chat_enabled: bool,
    pub super_chat_min_amount: f64,
    pub auto_moderate: bool,
    pub filter_spam: bool,
    pub filter_links: bool,
    pub require_verification: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            is_slow_mode: false,
            slow_mode_delay: 30,
            is_subscriber_only: false,
            is_emote_only: false,
            is_follower_only: false,
            follower_only_duration: 10,
            max_message_length: 500,
            is_profanity_filter_enabled: true,
            banned_words: Vec::new(),
            allowed_emotes: Vec::new(),
            super_chat_enabled: true,
            super_chat_min_amount: 1.0,
            auto_moderate: false,
            filter_spam: true,
            filter_links: false,
            require_verification: false,
        }
    }
}

/// Moderation command applied to a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationAction {
    Delete,
    Timeout,
    Ban,
    Highlight,
    Pin,
    Unpin,
}

impl ModerationAction {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Delete => "Delete Message",
            Self::Timeout => "Timeout User",
            Self::Ban => "Ban User",
            Self::Highlight => "Highlight Message",
            Self::Pin => "Pin Message",
            Self::Unpin => "Unpin Message",
        }
    }
}

/// Identity used for messages composed by this client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalIdentity {
    pub user_id: String,
    pub username: String,
    #[serde(rename = "avatarURL", default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl Default for LocalIdentity {
    fn default() -> Self {
        Self {
            user_id: "current-user-id".to_string(),
            username: "CurrentUser".to_string(),
            avatar_url: None,
        }
    }
}
