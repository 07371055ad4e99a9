//! # mychannel-chat: Real-time live-stream chat client
//!
//! Keeps one persistent connection per stream and maintains the local view
//! of its chat: a bounded message buffer, the present users, rolling
//! statistics and the stream's chat settings.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   JSON frames    ┌──────────────┐
//! │ ChatClient  │ ◄──────────────► │ chat backend │
//! │ (per stream)│   (Connector)    │              │
//! └──────┬──────┘                  └──────────────┘
//!        │
//!        ├──► MessageBuffer        (200 newest, reconciled by id)
//!        ├──► StatisticsAggregator
//!        ├──► RateLimiter          (60 sends / 60 s, slow mode)
//!        ├──► OutboundQueue        (replayed after reconnect)
//!        └──► broadcast<ChatEvent> (observers)
//! ```
//!
//! ## Modules
//!
//! - [`model`]: Messages, users, statistics and settings
//! - [`protocol`]: JSON wire envelope (`ChatFrame`)
//! - [`transport`]: Connector seam and the WebSocket transport
//! - [`client`]: Connection manager and session state
//! - [`moderation`]: Moderation commands
//! - [`buffer`], [`queue`], [`rate_limit`], [`stats`], [`validate`]:
//!   building blocks used by the client
//!
//! ## Example
//!
//! ```no_run
//! use mychannel_chat::{ChatClient, ChatConfig, ChatEvent};
//!
//! # async fn run() -> Result<(), mychannel_chat::ChatError> {
//! let client = ChatClient::new(ChatConfig::default());
//! let mut events = client.subscribe();
//! client.connect("abc").await?;
//! client.send_text("hello").await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let ChatEvent::MessageReceived(msg) = event {
//!         println!("{}: {}", msg.username, msg.content);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod moderation;
pub mod protocol;
pub mod queue;
pub mod rate_limit;
pub mod stats;
pub mod transport;
pub mod validate;

// Re-exports for convenience
pub use buffer::{MessageBuffer, DEFAULT_BUFFER_CAPACITY};
pub use client::{ChatClient, ChatEvent, ConnectionState};
pub use config::ChatConfig;
pub use error::ChatError;
pub use model::{
    ChatEmote, ChatMessage, ChatSettings, ChatStatistics, ChatUser, LocalIdentity, MessageType,
    ModerationAction, UserBadge,
};
pub use moderation::Moderator;
pub use protocol::{ChatFrame, InboundEvent, ModerationCommand, ProtocolError};
pub use transport::{Connector, InitialState, Link, TransportError, TransportEvent, WebSocketConnector};
