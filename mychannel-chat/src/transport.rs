//! Transport seam between the session core and the network.
//!
//! ```text
//!                 ┌──────────────┐  outbound (String)  ┌──────────────┐
//!  ChatClient ───►│ mpsc::Sender │────────────────────►│ writer task  │──► socket
//!                 └──────────────┘                     └──────────────┘
//!                 ┌──────────────┐  TransportEvent     ┌──────────────┐
//!  receive loop ◄─│ mpsc::Receiver│◄───────────────────│ reader task  │◄── socket
//!                 └──────────────┘                     └──────────────┘
//! ```
//!
//! A [`Connector`] opens a [`Link`] for a stream URL. The core only sees
//! channels of encoded frames, so WebSocket, SSE or long-poll transports
//! plug in the same way. The inbound channel closing is a transport drop.

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

use crate::model::{ChatMessage, ChatSettings, ChatUser};

const CHANNEL_CAPACITY: usize = 256;

/// Something the transport delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// One text frame.
    Frame(String),
    /// The peer closed the connection. Code 1000/1001 is a normal close.
    Closed { code: u16, reason: String },
}

/// Transport failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Connection timeout")]
    Timeout,
    #[error("Connection closed")]
    Closed,
}

/// State fetched right after connecting.
#[derive(Debug, Clone, Default)]
pub struct InitialState {
    pub history: Vec<ChatMessage>,
    pub users: Vec<ChatUser>,
    pub settings: Option<ChatSettings>,
}

/// An open connection, expressed as a pair of channels.
pub struct Link {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<TransportEvent>,
    tasks: Vec<AbortHandle>,
}

impl Link {
    pub fn new(outbound: mpsc::Sender<String>, inbound: mpsc::Receiver<TransportEvent>) -> Self {
        Self {
            outbound,
            inbound,
            tasks: Vec::new(),
        }
    }

    /// Attach a transport task that must stop when the link is torn down.
    pub fn with_task(mut self, handle: AbortHandle) -> Self {
        self.tasks.push(handle);
        self
    }

    /// Split into channels and a guard owning the transport tasks.
    pub fn into_parts(self) -> (mpsc::Sender<String>, mpsc::Receiver<TransportEvent>, LinkGuard) {
        (self.outbound, self.inbound, LinkGuard { tasks: self.tasks })
    }
}

/// Aborts the transport's own tasks when dropped.
#[derive(Debug, Default)]
pub struct LinkGuard {
    tasks: Vec<AbortHandle>,
}

impl Drop for LinkGuard {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Opens links to the chat backend.
pub trait Connector: Send + Sync + 'static {
    /// Open a persistent connection to `url`.
    fn connect(&self, url: String) -> BoxFuture<'static, Result<Link, TransportError>>;

    /// Fetch history, users and settings for a freshly joined stream.
    fn load_initial(&self, _stream_id: String) -> BoxFuture<'static, Result<InitialState, TransportError>> {
        Box::pin(async { Ok(InitialState::default()) })
    }
}

// ───────────────────────────────────────────────────────────────────
// WebSocket
// ───────────────────────────────────────────────────────────────────

/// WebSocket transport over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect(&self, url: String) -> BoxFuture<'static, Result<Link, TransportError>> {
        Box::pin(async move {
            let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(map_ws_error)?;
            let (mut ws_writer, mut ws_reader) = ws_stream.split();

            let (out_tx, mut out_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
            let (in_tx, in_rx) = mpsc::channel::<TransportEvent>(CHANNEL_CAPACITY);

            // Writer task: forward outgoing channel to WebSocket
            let writer = tokio::spawn(async move {
                while let Some(frame) = out_rx.recv().await {
                    if let Err(e) = ws_writer.send(Message::Text(frame.into())).await {
                        log::warn!("WebSocket write failed: {e}");
                        return;
                    }
                }
                // Sender dropped: the session is done with this link
                let _ = ws_writer.close().await;
            });

            // Reader task: surface frames until the socket ends
            let reader = tokio::spawn(async move {
                while let Some(msg) = ws_reader.next().await {
                    let event = match msg {
                        Ok(Message::Text(text)) => TransportEvent::Frame(text.as_str().to_owned()),
                        Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                            Ok(text) => TransportEvent::Frame(text),
                            Err(_) => {
                                log::warn!("Dropping non UTF-8 binary frame");
                                continue;
                            }
                        },
                        Ok(Message::Close(frame)) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                                .unwrap_or((u16::from(CloseCode::Normal), String::new()));
                            let _ = in_tx.send(TransportEvent::Closed { code, reason }).await;
                            break;
                        }
                        Ok(_) => continue,
                        Err(e) => {
                            log::warn!("WebSocket read failed: {e}");
                            break;
                        }
                    };
                    if in_tx.send(event).await.is_err() {
                        break;
                    }
                }
            });

            Ok(Link::new(out_tx, in_rx)
                .with_task(writer.abort_handle())
                .with_task(reader.abort_handle()))
        })
    }
}

fn map_ws_error(e: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match e {
        WsError::Io(io) => TransportError::Io(io.to_string()),
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
        other => TransportError::Handshake(other.to_string()),
    }
}

/// Whether a close code means an orderly shutdown rather than a failure.
pub fn is_normal_close(code: u16) -> bool {
    code == u16::from(CloseCode::Normal) || code == u16::from(CloseCode::Away)
}
