//! Session configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::model::LocalIdentity;

/// Chat client configuration.
///
/// Deserializes from partial JSON: any field left out keeps its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Base URL; streams are reached at `<endpoint>/chat/<streamId>`
    pub endpoint: String,
    /// Heartbeat period while connected
    pub heartbeat_interval_ms: u64,
    /// Upper bound on a single transport handshake
    pub connect_timeout_ms: u64,
    /// Reconnection attempts before entering the terminal error state
    pub max_reconnect_attempts: u32,
    /// Backoff unit: attempt `n` waits `base * 2^n`
    pub reconnect_base_delay_ms: u64,
    /// Backoff cap
    pub reconnect_max_delay_ms: u64,
    /// Sends allowed per trailing window
    pub rate_limit_max_messages: usize,
    /// Length of the trailing rate-limit window
    pub rate_limit_window_ms: u64,
    /// Chat history kept in memory
    pub buffer_capacity: usize,
    /// Hard cap on message content, in characters
    pub max_message_chars: usize,
    /// Messages kept for replay while offline
    pub outbound_queue_capacity: usize,
    /// Events buffered per observer before it starts lagging
    pub event_capacity: usize,
    /// Author identity for composed messages
    pub identity: LocalIdentity,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://api.mychannel.app".to_string(),
            heartbeat_interval_ms: 30_000,
            connect_timeout_ms: 30_000,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            rate_limit_max_messages: 60,
            rate_limit_window_ms: 60_000,
            buffer_capacity: 200,
            max_message_chars: 500,
            outbound_queue_capacity: 10_000,
            event_capacity: 256,
            identity: LocalIdentity::default(),
        }
    }
}

impl ChatConfig {
    /// Parse a JSON document, filling unspecified fields with defaults.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Transport URL for a stream.
    pub fn stream_url(&self, stream_id: &str) -> String {
        format!("{}/chat/{}", self.endpoint.trim_end_matches('/'), stream_id)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    /// Delay before reconnection attempt `attempt` (1-based).
    ///
    /// `min(base * 2^attempt, max)`; with the defaults this is
    /// 2, 4, 8, 16, 30 seconds for attempts 1 through 5.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = self.reconnect_base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.reconnect_max_delay_ms))
    }
}
