//! Outbound message validation.

use crate::error::ChatError;
use crate::model::{ChatMessage, ChatSettings};

/// Hard cap on message content, in characters.
pub const MAX_MESSAGE_CHARS: usize = 500;

/// Reject messages that must never be queued or transmitted.
///
/// Content is measured in characters, not bytes. The stream's
/// `max_message_length` can tighten `max_chars` but never relax it.
pub fn validate_message(
    message: &ChatMessage,
    settings: &ChatSettings,
    max_chars: usize,
) -> Result<(), ChatError> {
    if message.content.is_empty() {
        return Err(ChatError::InvalidMessage(
            "Message content cannot be empty".to_string(),
        ));
    }

    let limit = max_chars.min(settings.max_message_length.max(1));
    if message.content.chars().count() > limit {
        return Err(ChatError::InvalidMessage(format!(
            "Message too long (max {limit} characters)"
        )));
    }

    if message.is_super_chat() {
        validate_super_chat(message, settings)?;
    }

    Ok(())
}

fn validate_super_chat(message: &ChatMessage, settings: &ChatSettings) -> Result<(), ChatError> {
    if !settings.super_chat_enabled {
        return Err(ChatError::InvalidMessage(
            "Super chat is disabled for this stream".to_string(),
        ));
    }
    match message.super_chat_amount {
        Some(amount) if amount.is_finite() && amount >= settings.super_chat_min_amount => Ok(()),
        Some(amount) => Err(ChatError::InvalidMessage(format!(
            "Super chat amount {amount} is below the minimum of {}",
            settings.super_chat_min_amount
        ))),
        None => Err(ChatError::InvalidMessage(
            "Super chat requires an amount".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(content: &str) -> ChatMessage {
        ChatMessage::new("abc", "u1", "alice", content)
    }

    fn check(message: &ChatMessage) -> Result<(), ChatError> {
        validate_message(message, &ChatSettings::default(), MAX_MESSAGE_CHARS)
    }

    #[test]
    fn test_accepts_normal_message() {
        assert!(check(&msg("hello")).is_ok());
    }

    #[test]
    fn test_rejects_empty() {
        assert!(matches!(check(&msg("")), Err(ChatError::InvalidMessage(_))));
    }

    #[test]
    fn test_whitespace_only_is_not_empty() {
        assert!(check(&msg("   ")).is_ok());
        assert!(check(&msg("\n")).is_ok());
    }

    #[test]
    fn test_length_boundary_in_chars() {
        assert!(check(&msg(&"a".repeat(500))).is_ok());
        assert!(matches!(
            check(&msg(&"a".repeat(501))),
            Err(ChatError::InvalidMessage(_))
        ));
        // 500 multi-byte characters are still 500 characters
        assert!(check(&msg(&"é".repeat(500))).is_ok());
    }

    #[test]
    fn test_settings_tighten_limit() {
        let settings = ChatSettings { max_message_length: 10, ..ChatSettings::default() };
        assert!(validate_message(&msg("0123456789"), &settings, MAX_MESSAGE_CHARS).is_ok());
        assert!(validate_message(&msg("0123456789x"), &settings, MAX_MESSAGE_CHARS).is_err());
    }

    #[test]
    fn test_settings_cannot_relax_limit() {
        let settings = ChatSettings { max_message_length: 10_000, ..ChatSettings::default() };
        assert!(validate_message(&msg(&"a".repeat(501)), &settings, MAX_MESSAGE_CHARS).is_err());
    }

    #[test]
    fn test_super_chat_rules() {
        let ok = ChatMessage::super_chat("abc", "u1", "alice", "gg", 5.0);
        assert!(check(&ok).is_ok());

        let cheap = ChatMessage::super_chat("abc", "u1", "alice", "gg", 0.5);
        assert!(check(&cheap).is_err());

        let nan = ChatMessage::super_chat("abc", "u1", "alice", "gg", f64::NAN);
        assert!(check(&nan).is_err());

        let mut missing = ok.clone();
        missing.super_chat_amount = None;
        assert!(check(&missing).is_err());

        let disabled = ChatSettings { super_chat_enabled: false, ..ChatSettings::default() };
        assert!(validate_message(&ok, &disabled, MAX_MESSAGE_CHARS).is_err());
    }
}
