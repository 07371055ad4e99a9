//! Caller-facing chat errors.

use crate::protocol::ProtocolError;
use crate::transport::TransportError;

/// Errors surfaced by [`ChatClient`](crate::client::ChatClient) operations.
///
/// Validation and rate-limit failures never reach the outbound queue.
/// `MessageDeliveryFailed` means the message was kept for replay after
/// the next successful (re)connection.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChatError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Message delivery failed: {0}")]
    MessageDeliveryFailed(String),
    #[error("Rate limit exceeded. Please slow down.")]
    RateLimitExceeded,
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("Server error ({code}): {message}")]
    ServerError { code: u16, message: String },
    #[error("Network unavailable. Check your connection.")]
    NetworkUnavailable,
}

impl From<TransportError> for ChatError {
    fn from(e: TransportError) -> Self {
        Self::ConnectionFailed(e.to_string())
    }
}

impl From<ProtocolError> for ChatError {
    fn from(e: ProtocolError) -> Self {
        Self::InvalidMessage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ChatError::ConnectionFailed("refused".into()).to_string(),
            "Connection failed: refused"
        );
        assert_eq!(
            ChatError::ServerError { code: 4003, message: "banned".into() }.to_string(),
            "Server error (4003): banned"
        );
        assert_eq!(
            ChatError::RateLimitExceeded.to_string(),
            "Rate limit exceeded. Please slow down."
        );
    }

    #[test]
    fn test_transport_error_mapping() {
        let err: ChatError = TransportError::Timeout.into();
        assert_eq!(err, ChatError::ConnectionFailed("Connection timeout".into()));
    }
}
