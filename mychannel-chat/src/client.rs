//! Chat connection manager.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect, reconnect with backoff)
//! - Gated sends (validation, sliding-window rate limit) with optimistic
//!   local append and an outbound queue for failed deliveries
//! - Inbound frame routing into the message buffer, user set, statistics
//!   and settings
//! - Heartbeat round-trip latency
//!
//! ```text
//!   connect ──► Connecting ──► Connected ──(drop)──► Reconnecting ──► Connected
//!                   │                                     │
//!                   └──────────► Error ◄── attempts > max ┘
//!   disconnect (any state) ──► Disconnected
//! ```
//!
//! All session state lives behind one mutex; background tasks (receive
//! loop, heartbeat, reconnect) take it for every mutation and carry the
//! session generation they were started for, so a task that outlives its
//! connection becomes a no-op.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::buffer::{Insert, MessageBuffer};
use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::model::{ChatMessage, ChatSettings, ChatStatistics, ChatUser, ModerationAction};
use crate::moderation::{self, Moderator};
use crate::protocol::ChatFrame;
use crate::queue::OutboundQueue;
use crate::rate_limit::RateLimiter;
use crate::stats::StatisticsAggregator;
use crate::transport::{
    is_normal_close, Connector, Link, LinkGuard, TransportError, TransportEvent, WebSocketConnector,
};
use crate::validate::validate_message;

/// Client connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal until the next explicit `connect`.
    Error(String),
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Reconnecting => "Reconnecting",
            Self::Error(_) => "Error",
        }
    }

    /// No automatic transition leaves this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error(_))
    }
}

/// Events emitted by the chat client.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    StateChanged(ConnectionState),
    /// A message from the server that was not in the buffer yet
    MessageReceived(ChatMessage),
    /// A locally composed message was appended optimistically
    MessageSent(ChatMessage),
    /// The server echoed a locally sent message back
    MessageAcknowledged(String),
    /// A buffered message was replaced in place
    MessageUpdated(ChatMessage),
    MessageRemoved(String),
    UserJoined(ChatUser),
    UserLeft(String),
    StatisticsUpdated(ChatStatistics),
    SettingsUpdated(ChatSettings),
    LatencyUpdated(Duration),
    /// Queued messages were replayed after (re)connecting
    QueueDrained { sent: usize, remaining: usize },
    /// A failure no caller was waiting on
    Error(ChatError),
}

// ───────────────────────────────────────────────────────────────────
// Session state
// ───────────────────────────────────────────────────────────────────

/// Everything owned by one stream subscription.
pub(crate) struct Session {
    pub(crate) stream_id: Option<String>,
    pub(crate) state: ConnectionState,
    /// Bumped on every connect/disconnect; background tasks compare it
    pub(crate) generation: u64,
    pub(crate) outbound: Option<mpsc::Sender<String>>,
    /// Held for its `Drop`, which stops the transport tasks
    link_guard: Option<LinkGuard>,
    pub(crate) buffer: MessageBuffer,
    pub(crate) users: Vec<ChatUser>,
    pub(crate) stats: StatisticsAggregator,
    pub(crate) settings: ChatSettings,
    pub(crate) queue: OutboundQueue,
    limiter: RateLimiter,
    /// Ids appended optimistically and not yet echoed by the server
    pub(crate) pending_acks: HashSet<String>,
    /// Ids deleted locally; late inbound copies of them are dropped
    recently_deleted: VecDeque<String>,
    reconnect_attempts: u32,
    heartbeat_sent_at: Option<Instant>,
    latency: Option<Duration>,
    last_error: Option<ChatError>,
    receive_task: Option<JoinHandle<()>>,
    heartbeat_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
    pub(crate) events: broadcast::Sender<ChatEvent>,
}

impl Session {
    fn new(config: &ChatConfig, events: broadcast::Sender<ChatEvent>) -> Self {
        Self {
            stream_id: None,
            state: ConnectionState::Disconnected,
            generation: 0,
            outbound: None,
            link_guard: None,
            buffer: MessageBuffer::new(config.buffer_capacity),
            users: Vec::new(),
            stats: StatisticsAggregator::new(),
            settings: ChatSettings::default(),
            queue: OutboundQueue::new(config.outbound_queue_capacity),
            limiter: RateLimiter::new(config.rate_limit_max_messages, config.rate_limit_window()),
            pending_acks: HashSet::new(),
            recently_deleted: VecDeque::new(),
            reconnect_attempts: 0,
            heartbeat_sent_at: None,
            latency: None,
            last_error: None,
            receive_task: None,
            heartbeat_task: None,
            reconnect_task: None,
            events,
        }
    }

    pub(crate) fn emit(&self, event: ChatEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            log::debug!("Chat state {} -> {}", self.state.label(), state.label());
            self.state = state.clone();
            self.emit(ChatEvent::StateChanged(state));
        }
    }

    fn record_error(&mut self, error: ChatError) {
        self.last_error = Some(error.clone());
        self.emit(ChatEvent::Error(error));
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.outbound.is_some()
    }

    /// Stop the heartbeat and receive tasks and release the link.
    fn close_link(&mut self) {
        if let Some(task) = self.heartbeat_task.take() {
            task.abort();
        }
        if let Some(task) = self.receive_task.take() {
            task.abort();
        }
        self.outbound = None;
        self.link_guard = None;
        self.heartbeat_sent_at = None;
    }

    fn abort_reconnect(&mut self) {
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
    }

    /// Hand one frame to the transport without waiting.
    ///
    /// A full transport channel is a delivery failure; callers hold the
    /// session lock and must never block on the writer.
    pub(crate) fn transmit(&self, frame: &ChatFrame) -> Result<(), String> {
        let outbound = match (&self.state, &self.outbound) {
            (ConnectionState::Connected, Some(tx)) => tx,
            _ => return Err("Not connected to chat".to_string()),
        };
        let raw = frame.encode().map_err(|e| e.to_string())?;
        outbound.try_send(raw).map_err(|e| match e {
            TrySendError::Full(_) => "Transport is not accepting frames".to_string(),
            TrySendError::Closed(_) => "Connection closed".to_string(),
        })
    }

    /// Remember a deleted id, keeping as many as the buffer holds.
    pub(crate) fn remember_deleted(&mut self, id: &str) {
        if self.recently_deleted.iter().any(|d| d == id) {
            return;
        }
        if self.recently_deleted.len() >= self.buffer.capacity() {
            self.recently_deleted.pop_front();
        }
        self.recently_deleted.push_back(id.to_string());
    }

    fn was_deleted(&self, id: &str) -> bool {
        self.recently_deleted.iter().any(|d| d == id)
    }

    /// Append a locally composed message ahead of any server echo.
    fn append_local(&mut self, message: ChatMessage) {
        self.pending_acks.insert(message.id.clone());
        self.insert_message(message.clone());
        self.emit(ChatEvent::MessageSent(message));
    }

    fn insert_message(&mut self, message: ChatMessage) -> Insert {
        let outcome = self.buffer.insert(message);
        if let Insert::Appended { evicted: Some(old) } = &outcome {
            self.pending_acks.remove(&old.id);
        }
        outcome
    }

    /// Replay queued messages in order, stopping at the first failure.
    fn flush_queue(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let entries = self.queue.drain();
        let total = entries.len();
        let mut failed = Vec::new();
        let mut sent = 0;
        let mut pending = entries.into_iter();

        while let Some(entry) = pending.next() {
            match self.transmit(&ChatFrame::ChatMessage(entry.message.clone())) {
                Ok(()) => sent += 1,
                Err(reason) => {
                    log::warn!("Replay of queued message {} failed: {reason}", entry.message.id);
                    failed.push(entry);
                    failed.extend(pending.by_ref());
                    break;
                }
            }
        }

        self.queue.restore_front(failed);
        log::info!("Replayed {sent}/{total} queued messages");
        self.emit(ChatEvent::QueueDrained {
            sent,
            remaining: self.queue.len(),
        });
    }

    /// Route one inbound frame.
    fn dispatch(&mut self, frame: ChatFrame) {
        match frame {
            ChatFrame::ChatMessage(message) => self.receive_message(message),

            ChatFrame::UserJoined(user) => {
                if let Some(existing) = self.users.iter_mut().find(|u| u.id == user.id) {
                    *existing = user.clone();
                } else {
                    self.users.push(user.clone());
                    self.stats.user_joined();
                    self.emit(ChatEvent::StatisticsUpdated(self.stats.snapshot()));
                }
                log::debug!("User {} joined", user.id);
                self.emit(ChatEvent::UserJoined(user));
            }

            ChatFrame::UserLeft(user_id) => {
                self.users.retain(|u| u.id != user_id);
                self.stats.user_left();
                log::debug!("User {user_id} left");
                self.emit(ChatEvent::UserLeft(user_id));
                self.emit(ChatEvent::StatisticsUpdated(self.stats.snapshot()));
            }

            ChatFrame::StatisticsUpdate(stats) => {
                self.stats.replace(stats.clone());
                self.emit(ChatEvent::StatisticsUpdated(stats));
            }

            ChatFrame::SettingsUpdate(settings) => {
                self.settings = settings.clone();
                self.emit(ChatEvent::SettingsUpdated(settings));
            }

            ChatFrame::ModerationAction(cmd) => {
                moderation::apply_local(self, &cmd.message_id, cmd.action);
            }

            ChatFrame::Heartbeat => {
                if let Some(sent_at) = self.heartbeat_sent_at.take() {
                    let rtt = sent_at.elapsed();
                    log::trace!("Heartbeat round trip {rtt:?}");
                    self.latency = Some(rtt);
                    self.emit(ChatEvent::LatencyUpdated(rtt));
                }
            }
        }
    }

    fn receive_message(&mut self, message: ChatMessage) {
        let id = message.id.clone();
        if self.was_deleted(&id) {
            log::debug!("Ignoring inbound copy of deleted message {id}");
            return;
        }
        let acknowledged = self.pending_acks.remove(&id);
        let redelivered = !acknowledged && self.buffer.contains(&id);

        self.insert_message(message.clone());

        if !redelivered {
            self.stats.record_message(&message);
            self.emit(ChatEvent::StatisticsUpdated(self.stats.snapshot()));
        }
        if acknowledged {
            self.emit(ChatEvent::MessageAcknowledged(id));
        } else if redelivered {
            self.emit(ChatEvent::MessageUpdated(message));
        } else {
            self.emit(ChatEvent::MessageReceived(message));
        }
    }

    /// Drop all per-stream state.
    fn clear(&mut self) {
        self.buffer.clear();
        self.users.clear();
        self.queue.clear();
        self.pending_acks.clear();
        self.recently_deleted.clear();
        self.settings = ChatSettings::default();
        self.stats.reset();
        self.stream_id = None;
        self.reconnect_attempts = 0;
        self.latency = None;
        self.last_error = None;
    }
}

// ───────────────────────────────────────────────────────────────────
// Client
// ───────────────────────────────────────────────────────────────────

pub(crate) struct Shared {
    pub(crate) config: ChatConfig,
    connector: Arc<dyn Connector>,
    pub(crate) session: Mutex<Session>,
    /// Serializes handshakes so only one link is ever being opened
    connect_gate: Mutex<()>,
    events: broadcast::Sender<ChatEvent>,
}

/// The chat client for one stream subscription.
///
/// Cheap to clone; clones share the same session. Construct one per
/// stream rather than sharing a global instance.
#[derive(Clone)]
pub struct ChatClient {
    pub(crate) shared: Arc<Shared>,
}

impl ChatClient {
    /// Create a client that talks WebSocket.
    pub fn new(config: ChatConfig) -> Self {
        Self::with_connector(config, WebSocketConnector)
    }

    /// Create a client over a custom transport.
    pub fn with_connector(config: ChatConfig, connector: impl Connector) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let session = Session::new(&config, events.clone());
        Self {
            shared: Arc::new(Shared {
                config,
                connector: Arc::new(connector),
                session: Mutex::new(session),
                connect_gate: Mutex::new(()),
                events,
            }),
        }
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.shared.events.subscribe()
    }

    pub fn config(&self) -> &ChatConfig {
        &self.shared.config
    }

    /// Connect to a stream's chat.
    ///
    /// A no-op when already connected. On failure the state becomes
    /// `Error` and `ConnectionFailed` is returned.
    pub async fn connect(&self, stream_id: &str) -> Result<(), ChatError> {
        let shared = &self.shared;
        let _gate = shared.connect_gate.lock().await;

        let generation = {
            let mut s = shared.session.lock().await;
            if s.state == ConnectionState::Connected {
                log::debug!("Already connected, ignoring connect to {stream_id}");
                return Ok(());
            }
            s.abort_reconnect();
            s.close_link();
            s.generation += 1;
            s.stream_id = Some(stream_id.to_string());
            s.last_error = None;
            s.set_state(ConnectionState::Connecting);
            s.generation
        };

        log::info!("Connecting to chat for stream {stream_id}");
        let result = shared.open_link(stream_id).await;

        let mut s = shared.session.lock().await;
        if s.generation != generation {
            log::info!("Connect to {stream_id} superseded by disconnect");
            return Err(ChatError::ConnectionFailed(
                "Disconnected while connecting".to_string(),
            ));
        }
        match result {
            Ok(link) => {
                Shared::install(shared, &mut s, link);
                let generation = s.generation;
                drop(s);
                shared.load_initial(stream_id, generation).await;
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to connect to chat for stream {stream_id}: {e}");
                let error = ChatError::from(e);
                s.set_state(ConnectionState::Error(error.to_string()));
                s.record_error(error.clone());
                Err(error)
            }
        }
    }

    /// Tear down the session. Idempotent.
    ///
    /// Cancels the heartbeat, the receive loop and any pending
    /// reconnection, then clears messages, users, queue and settings.
    pub async fn disconnect(&self) {
        let mut s = self.shared.session.lock().await;
        s.generation += 1;
        s.abort_reconnect();
        s.close_link();
        s.clear();
        s.set_state(ConnectionState::Disconnected);
        log::info!("Disconnected from chat");
    }

    /// Send a chat message.
    ///
    /// Validation and rate-limit failures return immediately and nothing
    /// is queued. Otherwise the message is appended locally first; if it
    /// cannot be handed to the transport it is queued for replay and
    /// `MessageDeliveryFailed` is returned.
    pub async fn send_message(&self, message: ChatMessage) -> Result<(), ChatError> {
        let config = &self.shared.config;
        let mut s = self.shared.session.lock().await;

        validate_message(&message, &s.settings, config.max_message_chars)?;

        let slow_mode = s
            .settings
            .is_slow_mode
            .then(|| Duration::from_secs(s.settings.slow_mode_delay));
        if let Err(throttle) = s.limiter.try_acquire(slow_mode) {
            log::debug!("Send throttled: {throttle:?}");
            return Err(ChatError::RateLimitExceeded);
        }

        s.append_local(message.clone());

        // Older queued messages go out first
        if !s.queue.is_empty() && s.is_connected() {
            s.flush_queue();
        }
        let result = if s.queue.is_empty() {
            s.transmit(&ChatFrame::ChatMessage(message.clone()))
        } else {
            Err("Earlier messages are still awaiting delivery".to_string())
        };

        match result {
            Ok(()) => {
                log::trace!("Sent message {}", message.id);
                Ok(())
            }
            Err(reason) => {
                let id = message.id.clone();
                if s.queue.enqueue(message) {
                    log::info!("Queued message {id} for replay: {reason}");
                } else {
                    log::warn!("Outbound queue full, message {id} will not be replayed");
                }
                Err(ChatError::MessageDeliveryFailed(reason))
            }
        }
    }

    /// Compose and send a text message to the current stream.
    pub async fn send_text(&self, content: &str) -> Result<(), ChatError> {
        let stream_id = self
            .stream_id()
            .await
            .ok_or_else(|| ChatError::ConnectionFailed("Not connected to chat".to_string()))?;
        let identity = &self.shared.config.identity;
        let mut message =
            ChatMessage::new(stream_id, &identity.user_id, &identity.username, content);
        message.user_avatar_url = identity.avatar_url.clone();
        self.send_message(message).await
    }

    /// Send a paid, highlighted message.
    pub async fn send_super_chat(
        &self,
        stream_id: &str,
        text: &str,
        amount: f64,
    ) -> Result<(), ChatError> {
        let identity = &self.shared.config.identity;
        let mut message =
            ChatMessage::super_chat(stream_id, &identity.user_id, &identity.username, text, amount);
        message.user_avatar_url = identity.avatar_url.clone();
        self.send_message(message).await
    }

    /// Push new settings for the connected stream.
    pub async fn update_chat_settings(
        &self,
        stream_id: &str,
        settings: ChatSettings,
    ) -> Result<(), ChatError> {
        let mut s = self.shared.session.lock().await;
        if !s.is_connected() || s.stream_id.as_deref() != Some(stream_id) {
            return Err(ChatError::ConnectionFailed(format!(
                "Not connected to stream {stream_id}"
            )));
        }
        s.transmit(&ChatFrame::SettingsUpdate(settings.clone()))
            .map_err(ChatError::MessageDeliveryFailed)?;
        s.settings = settings.clone();
        s.emit(ChatEvent::SettingsUpdated(settings));
        Ok(())
    }

    /// Moderation commands for this session.
    pub fn moderator(&self) -> Moderator {
        Moderator::new(self.clone())
    }

    pub async fn moderate_message(
        &self,
        message_id: &str,
        action: ModerationAction,
    ) -> Result<(), ChatError> {
        self.moderator().moderate(message_id, action).await
    }

    pub async fn pin_message(&self, message_id: &str) -> Result<(), ChatError> {
        self.moderator().pin(message_id).await
    }

    pub async fn unpin_message(&self, message_id: &str) -> Result<(), ChatError> {
        self.moderator().unpin(message_id).await
    }

    /// Report the host's network reachability.
    ///
    /// Loss of network is recorded as `NetworkUnavailable`; recovery is left
    /// to transport drop detection.
    pub async fn report_network_status(&self, available: bool) {
        if available {
            return;
        }
        log::warn!("Network reported unavailable");
        let mut s = self.shared.session.lock().await;
        s.record_error(ChatError::NetworkUnavailable);
    }

    // ─── Read accessors ──────────────────────────────────────────────

    /// Buffered messages, oldest first.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.shared.session.lock().await.buffer.snapshot()
    }

    /// The newest `limit` messages, oldest first.
    pub async fn recent_messages(&self, limit: usize) -> Vec<ChatMessage> {
        self.shared.session.lock().await.buffer.recent(limit)
    }

    pub async fn pinned_messages(&self) -> Vec<ChatMessage> {
        self.shared.session.lock().await.buffer.pinned()
    }

    pub async fn users(&self) -> Vec<ChatUser> {
        self.shared.session.lock().await.users.clone()
    }

    pub async fn statistics(&self) -> ChatStatistics {
        self.shared.session.lock().await.stats.snapshot()
    }

    pub async fn settings(&self) -> ChatSettings {
        self.shared.session.lock().await.settings.clone()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.shared.session.lock().await.state.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.shared.session.lock().await.is_connected()
    }

    /// Last heartbeat round trip, if one completed on this connection.
    pub async fn latency(&self) -> Option<Duration> {
        self.shared.session.lock().await.latency
    }

    /// Messages waiting for replay, oldest first.
    pub async fn queued_messages(&self) -> Vec<ChatMessage> {
        self.shared.session.lock().await.queue.messages()
    }

    pub async fn reconnect_attempts(&self) -> u32 {
        self.shared.session.lock().await.reconnect_attempts
    }

    pub async fn stream_id(&self) -> Option<String> {
        self.shared.session.lock().await.stream_id.clone()
    }

    /// Most recent failure not reported to a caller.
    pub async fn last_error(&self) -> Option<ChatError> {
        self.shared.session.lock().await.last_error.clone()
    }
}

// ───────────────────────────────────────────────────────────────────
// Background work
// ───────────────────────────────────────────────────────────────────

impl Shared {
    /// Open a link for a stream, bounded by the connect timeout.
    async fn open_link(&self, stream_id: &str) -> Result<Link, TransportError> {
        let url = self.config.stream_url(stream_id);
        match tokio::time::timeout(self.config.connect_timeout(), self.connector.connect(url)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    /// Adopt a freshly opened link as the session's connection.
    fn install(shared: &Arc<Self>, s: &mut Session, link: Link) {
        s.close_link();
        s.generation += 1;
        let generation = s.generation;

        let (outbound, inbound, guard) = link.into_parts();
        s.outbound = Some(outbound);
        s.link_guard = Some(guard);
        s.reconnect_attempts = 0;
        s.set_state(ConnectionState::Connected);
        log::info!(
            "Connected to chat for stream {}",
            s.stream_id.as_deref().unwrap_or_default()
        );

        let weak = Arc::downgrade(shared);
        s.receive_task = Some(tokio::spawn(receive_loop(weak.clone(), generation, inbound)));
        s.heartbeat_task = Some(tokio::spawn(heartbeat_loop(
            weak,
            generation,
            shared.config.heartbeat_interval(),
        )));

        s.flush_queue();
    }

    /// Merge history, users and settings fetched after connecting.
    async fn load_initial(&self, stream_id: &str, generation: u64) {
        let load = self.connector.load_initial(stream_id.to_string());
        let initial = match tokio::time::timeout(self.config.connect_timeout(), load).await {
            Ok(Ok(initial)) => initial,
            Ok(Err(e)) => {
                log::warn!("Initial chat state for {stream_id} unavailable: {e}");
                return;
            }
            Err(_) => {
                log::warn!("Initial chat state for {stream_id} timed out");
                return;
            }
        };

        let mut s = self.session.lock().await;
        if s.generation != generation {
            return;
        }
        let history = initial.history.len();
        for message in initial.history {
            s.insert_message(message);
        }
        if !initial.users.is_empty() {
            s.users = initial.users;
        }
        if let Some(settings) = initial.settings {
            s.settings = settings.clone();
            s.emit(ChatEvent::SettingsUpdated(settings));
        }
        log::debug!(
            "Loaded {history} messages and {} users for {stream_id}",
            s.users.len()
        );
    }

    /// The link for `generation` ended without a disconnect call.
    async fn connection_lost(shared: &Arc<Self>, generation: u64, close: Option<(u16, String)>) {
        let mut s = shared.session.lock().await;
        if s.generation != generation || s.state != ConnectionState::Connected {
            return;
        }
        // This runs on the receive task itself; detach rather than abort it
        s.receive_task = None;
        s.close_link();

        let error = match close {
            Some((code, reason)) if !is_normal_close(code) => ChatError::ServerError {
                code,
                message: reason,
            },
            _ => ChatError::ConnectionFailed("Connection lost".to_string()),
        };
        log::warn!("Chat connection lost: {error}");
        s.record_error(error);

        Self::schedule_reconnect(shared, &mut s);
    }

    /// Count a reconnection attempt and either schedule it or give up.
    fn schedule_reconnect(shared: &Arc<Self>, s: &mut Session) {
        s.reconnect_attempts += 1;
        let max = shared.config.max_reconnect_attempts;
        if s.reconnect_attempts > max {
            log::error!("Giving up on chat after {max} reconnection attempts");
            s.set_state(ConnectionState::Error(format!(
                "Reconnection failed after {max} attempts"
            )));
            return;
        }
        let Some(stream_id) = s.stream_id.clone() else {
            s.set_state(ConnectionState::Disconnected);
            return;
        };
        s.set_state(ConnectionState::Reconnecting);
        s.reconnect_task = Some(tokio::spawn(reconnect_loop(
            Arc::downgrade(shared),
            s.generation,
            stream_id,
        )));
    }
}

async fn receive_loop(
    shared: Weak<Shared>,
    generation: u64,
    mut inbound: mpsc::Receiver<TransportEvent>,
) {
    let mut close = None;
    while let Some(event) = inbound.recv().await {
        match event {
            TransportEvent::Frame(raw) => {
                let frame = match ChatFrame::decode(&raw) {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::warn!("Failed to decode chat frame: {e}");
                        continue;
                    }
                };
                let Some(shared) = shared.upgrade() else { return };
                let mut s = shared.session.lock().await;
                if s.generation != generation {
                    return;
                }
                log::trace!("Inbound {}", frame.kind());
                s.dispatch(frame);
            }
            TransportEvent::Closed { code, reason } => {
                log::info!("Chat connection closed by server ({code}): {reason}");
                close = Some((code, reason));
                break;
            }
        }
    }

    if let Some(shared) = shared.upgrade() {
        Shared::connection_lost(&shared, generation, close).await;
    }
}

async fn heartbeat_loop(shared: Weak<Shared>, generation: u64, period: Duration) {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else { return };
        let mut s = shared.session.lock().await;
        if s.generation != generation || s.state != ConnectionState::Connected {
            return;
        }
        s.heartbeat_sent_at = Some(Instant::now());
        if let Err(reason) = s.transmit(&ChatFrame::Heartbeat) {
            // Drop detection belongs to the receive loop
            log::debug!("Heartbeat not sent: {reason}");
            s.heartbeat_sent_at = None;
        }
    }
}

async fn reconnect_loop(shared: Weak<Shared>, generation: u64, stream_id: String) {
    loop {
        let Some(strong) = shared.upgrade() else { return };
        let attempt = {
            let s = strong.session.lock().await;
            if s.generation != generation {
                return;
            }
            s.reconnect_attempts
        };
        let delay = strong.config.backoff_delay(attempt);
        let max = strong.config.max_reconnect_attempts;
        drop(strong);

        log::info!("Reconnecting to {stream_id} in {delay:?} (attempt {attempt}/{max})");
        tokio::time::sleep(delay).await;

        let Some(strong) = shared.upgrade() else { return };
        let _gate = strong.connect_gate.lock().await;
        if strong.session.lock().await.generation != generation {
            return;
        }

        let result = strong.open_link(&stream_id).await;

        let mut s = strong.session.lock().await;
        if s.generation != generation {
            return;
        }
        match result {
            Ok(link) => {
                // Detach our own handle; the session is live again
                s.reconnect_task = None;
                Shared::install(&strong, &mut s, link);
                let generation = s.generation;
                drop(s);
                strong.load_initial(&stream_id, generation).await;
                return;
            }
            Err(e) => {
                log::warn!("Reconnection attempt {attempt} failed: {e}");
                s.reconnect_attempts += 1;
                if s.reconnect_attempts > max {
                    log::error!("Giving up on chat after {max} reconnection attempts");
                    s.record_error(ChatError::from(e));
                    s.set_state(ConnectionState::Error(format!(
                        "Reconnection failed after {max} attempts"
                    )));
                    s.reconnect_task = None;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_labels() {
        assert_eq!(ConnectionState::Reconnecting.label(), "Reconnecting");
        assert_eq!(ConnectionState::Error("x".into()).label(), "Error");
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(ConnectionState::Error("x".into()).is_terminal());
        assert!(!ConnectionState::Reconnecting.is_terminal());
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let client = ChatClient::new(ChatConfig::default());

        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert!(!client.is_connected().await);
        assert!(client.messages().await.is_empty());
        assert!(client.latency().await.is_none());
        assert_eq!(client.reconnect_attempts().await, 0);
        assert_eq!(client.settings().await, ChatSettings::default());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let client = ChatClient::new(ChatConfig::default());
        let mut events = client.subscribe();

        client.disconnect().await;
        client.disconnect().await;

        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        // Already disconnected, so no state change is reported
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_while_disconnected_queues() {
        let client = ChatClient::new(ChatConfig::default());
        let msg = ChatMessage::new("abc", "u1", "alice", "hello");

        let result = client.send_message(msg.clone()).await;
        assert!(matches!(result, Err(ChatError::MessageDeliveryFailed(_))));

        // Kept optimistically and queued for replay
        assert_eq!(client.messages().await, vec![msg.clone()]);
        assert_eq!(client.queued_messages().await, vec![msg]);
    }

    #[tokio::test]
    async fn test_invalid_message_not_queued() {
        let client = ChatClient::new(ChatConfig::default());
        let empty = ChatMessage::new("abc", "u1", "alice", "");
        let long = ChatMessage::new("abc", "u1", "alice", "x".repeat(501));

        assert!(matches!(
            client.send_message(empty).await,
            Err(ChatError::InvalidMessage(_))
        ));
        assert!(matches!(
            client.send_message(long).await,
            Err(ChatError::InvalidMessage(_))
        ));
        assert!(client.queued_messages().await.is_empty());
        assert!(client.messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_send_text_requires_stream() {
        let client = ChatClient::new(ChatConfig::default());
        assert!(matches!(
            client.send_text("hi").await,
            Err(ChatError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_moderation_requires_connection() {
        let client = ChatClient::new(ChatConfig::default());
        assert!(matches!(
            client.pin_message("m1").await,
            Err(ChatError::ConnectionFailed(_))
        ));
        assert!(matches!(
            client.update_chat_settings("abc", ChatSettings::default()).await,
            Err(ChatError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_network_unavailable_recorded() {
        let client = ChatClient::new(ChatConfig::default());
        let mut events = client.subscribe();

        client.report_network_status(true).await;
        assert!(client.last_error().await.is_none());

        client.report_network_status(false).await;
        assert_eq!(client.last_error().await, Some(ChatError::NetworkUnavailable));
        assert!(matches!(
            events.try_recv(),
            Ok(ChatEvent::Error(ChatError::NetworkUnavailable))
        ));
    }

    #[test]
    fn test_dispatch_routes_frames() {
        let (events, _) = broadcast::channel(16);
        let mut s = Session::new(&ChatConfig::default(), events);

        let mut msg = ChatMessage::new("abc", "u2", "bob", "hi");
        msg.id = "1".into();
        s.dispatch(ChatFrame::ChatMessage(msg.clone()));
        s.dispatch(ChatFrame::UserJoined(ChatUser::new("u2", "bob")));
        s.dispatch(ChatFrame::UserJoined(ChatUser::new("u3", "carol")));
        s.dispatch(ChatFrame::UserLeft("u2".into()));

        assert_eq!(s.buffer.ids(), vec!["1"]);
        assert_eq!(s.users.len(), 1);
        let stats = s.stats.snapshot();
        assert_eq!(stats.active_users, 1);
        assert_eq!(stats.peak_viewers, 2);
        assert_eq!(stats.total_messages, 1);

        // Redelivery replaces in place and is not counted twice
        s.dispatch(ChatFrame::ChatMessage(msg));
        assert_eq!(s.buffer.len(), 1);
        assert_eq!(s.stats.snapshot().total_messages, 1);
    }

    #[test]
    fn test_echo_acknowledges_optimistic_message() {
        let (events, mut rx) = broadcast::channel(16);
        let mut s = Session::new(&ChatConfig::default(), events);

        let msg = ChatMessage::new("abc", "u1", "alice", "hello");
        s.append_local(msg.clone());
        s.dispatch(ChatFrame::ChatMessage(msg.clone()));

        assert_eq!(s.buffer.len(), 1);
        assert!(s.pending_acks.is_empty());
        assert_eq!(s.stats.snapshot().total_messages, 1);

        let mut acked = false;
        while let Ok(event) = rx.try_recv() {
            if let ChatEvent::MessageAcknowledged(id) = event {
                acked = id == msg.id;
            }
        }
        assert!(acked);
    }

    #[test]
    fn test_deleted_message_not_restored_by_echo() {
        let (events, _) = broadcast::channel(16);
        let mut s = Session::new(&ChatConfig::default(), events);

        let msg = ChatMessage::new("abc", "u1", "alice", "oops");
        s.append_local(msg.clone());
        moderation::apply_local(&mut s, &msg.id, ModerationAction::Delete);
        assert!(s.buffer.is_empty());

        // Server echo of the send arrives after the delete
        s.dispatch(ChatFrame::ChatMessage(msg.clone()));
        assert!(s.buffer.is_empty());
        assert!(s.pending_acks.is_empty());
        assert_eq!(s.stats.snapshot().total_messages, 0);
    }

    #[test]
    fn test_duplicate_join_not_double_counted() {
        let (events, _) = broadcast::channel(16);
        let mut s = Session::new(&ChatConfig::default(), events);

        s.dispatch(ChatFrame::UserJoined(ChatUser::new("u1", "alice")));
        s.dispatch(ChatFrame::UserJoined(ChatUser::new("u1", "alice")));
        assert_eq!(s.users.len(), 1);
        assert_eq!(s.stats.snapshot().active_users, 1);
    }

    #[test]
    fn test_unsolicited_heartbeat_has_no_latency() {
        let (events, _) = broadcast::channel(16);
        let mut s = Session::new(&ChatConfig::default(), events);
        s.dispatch(ChatFrame::Heartbeat);
        assert!(s.latency.is_none());
    }
}
