//! Integration tests against a real WebSocket server.
//!
//! These tests start a local chat server and connect real clients,
//! verifying the full pipeline from socket to session state.

use futures_util::{SinkExt, StreamExt};
use mychannel_chat::client::{ChatClient, ChatEvent, ConnectionState};
use mychannel_chat::config::ChatConfig;
use mychannel_chat::error::ChatError;
use mychannel_chat::model::ChatUser;
use mychannel_chat::protocol::ChatFrame;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

#[derive(Clone, Copy)]
enum Mode {
    /// Greet with a join, then echo chat messages and heartbeats.
    Echo,
    /// Close every connection right after the handshake.
    CloseWith(CloseCode),
}

struct TestServer {
    port: u16,
    /// Request paths of accepted connections.
    paths: mpsc::UnboundedReceiver<String>,
    /// Fires once per connection the server saw end.
    closed: mpsc::UnboundedReceiver<()>,
}

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a server on a free port.
async fn start_test_server(mode: Mode) -> TestServer {
    let port = free_port().await;
    let listener = TcpListener::bind(format!("127.0.0.1:{port}")).await.unwrap();
    let (paths_tx, paths) = mpsc::unbounded_channel();
    let (closed_tx, closed) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(handle_connection(stream, mode, paths_tx.clone(), closed_tx.clone()));
        }
    });

    TestServer { port, paths, closed }
}

async fn handle_connection(
    stream: TcpStream,
    mode: Mode,
    paths: mpsc::UnboundedSender<String>,
    closed: mpsc::UnboundedSender<()>,
) {
    let callback = move |req: &Request, resp: Response| {
        let _ = paths.send(req.uri().path().to_string());
        Ok::<_, ErrorResponse>(resp)
    };
    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };

    match mode {
        Mode::CloseWith(code) => {
            let _ = ws
                .close(Some(CloseFrame {
                    code,
                    reason: "internal error".into(),
                }))
                .await;
        }
        Mode::Echo => {
            let greeting = ChatFrame::UserJoined(ChatUser::new("host", "host")).encode().unwrap();
            if ws.send(Message::Text(greeting.into())).await.is_err() {
                return;
            }
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Text(text) => match ChatFrame::decode(text.as_str()) {
                        Ok(frame @ (ChatFrame::ChatMessage(_) | ChatFrame::Heartbeat)) => {
                            let reply = frame.encode().unwrap();
                            if ws.send(Message::Text(reply.into())).await.is_err() {
                                break;
                            }
                        }
                        _ => {}
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }
    let _ = closed.send(());
}

fn config_for(port: u16) -> ChatConfig {
    ChatConfig {
        endpoint: format!("ws://127.0.0.1:{port}"),
        ..ChatConfig::default()
    }
}

async fn wait_for<F>(events: &mut broadcast::Receiver<ChatEvent>, mut pred: F) -> ChatEvent
where
    F: FnMut(&ChatEvent) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("Event channel closed: {e}"),
            }
        }
    })
    .await
    .expect("event within timeout")
}

#[tokio::test]
async fn test_client_connects_and_receives_state() {
    let mut server = start_test_server(Mode::Echo).await;
    let client = ChatClient::new(config_for(server.port));
    let mut events = client.subscribe();

    client.connect("abc").await.unwrap();
    assert_eq!(client.connection_state().await, ConnectionState::Connected);

    let path = timeout(Duration::from_secs(2), server.paths.recv()).await.unwrap();
    assert_eq!(path.as_deref(), Some("/chat/abc"));

    match wait_for(&mut events, |e| matches!(e, ChatEvent::UserJoined(_))).await {
        ChatEvent::UserJoined(user) => assert_eq!(user.id, "host"),
        other => panic!("Expected UserJoined, got {other:?}"),
    }
    assert_eq!(client.users().await.len(), 1);
    assert_eq!(client.statistics().await.active_users, 1);
}

#[tokio::test]
async fn test_message_echo_acknowledged() {
    let server = start_test_server(Mode::Echo).await;
    let client = ChatClient::new(config_for(server.port));
    let mut events = client.subscribe();
    client.connect("abc").await.unwrap();

    client.send_text("hello from the test").await.unwrap();

    wait_for(&mut events, |e| matches!(e, ChatEvent::MessageAcknowledged(_))).await;
    let messages = client.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "hello from the test");
    assert_eq!(client.statistics().await.total_messages, 1);
}

#[tokio::test]
async fn test_heartbeat_round_trip() {
    let server = start_test_server(Mode::Echo).await;
    let config = ChatConfig {
        heartbeat_interval_ms: 100,
        ..config_for(server.port)
    };
    let client = ChatClient::new(config);
    let mut events = client.subscribe();
    client.connect("abc").await.unwrap();

    wait_for(&mut events, |e| matches!(e, ChatEvent::LatencyUpdated(_))).await;
    assert!(client.latency().await.is_some());
}

#[tokio::test]
async fn test_server_close_triggers_reconnect() {
    let server = start_test_server(Mode::CloseWith(CloseCode::Error)).await;
    let config = ChatConfig {
        reconnect_base_delay_ms: 10,
        reconnect_max_delay_ms: 50,
        ..config_for(server.port)
    };
    let client = ChatClient::new(config);
    let mut events = client.subscribe();

    client.connect("abc").await.unwrap();
    wait_for(&mut events, |e| {
        matches!(e, ChatEvent::StateChanged(ConnectionState::Reconnecting))
    })
    .await;

    assert_eq!(
        client.last_error().await,
        Some(ChatError::ServerError {
            code: 1011,
            message: "internal error".into()
        })
    );
    client.disconnect().await;
    assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_to_dead_port() {
    let port = free_port().await;
    let client = ChatClient::new(config_for(port));

    let result = client.connect("abc").await;
    assert!(matches!(result, Err(ChatError::ConnectionFailed(_))));
    assert!(matches!(client.connection_state().await, ConnectionState::Error(_)));
}

#[tokio::test]
async fn test_disconnect_closes_socket() {
    let mut server = start_test_server(Mode::Echo).await;
    let client = ChatClient::new(config_for(server.port));
    client.connect("abc").await.unwrap();

    client.disconnect().await;

    let closed = timeout(Duration::from_secs(2), server.closed.recv()).await;
    assert!(closed.is_ok(), "Server should see the connection end");
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn test_two_clients_same_stream() {
    let server = start_test_server(Mode::Echo).await;

    let alice = ChatClient::new(config_for(server.port));
    let bob = ChatClient::new(config_for(server.port));
    alice.connect("abc").await.unwrap();
    bob.connect("abc").await.unwrap();

    // Sessions are independent
    alice.send_text("only alice sees this echo").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(alice.messages().await.len(), 1);
    assert!(bob.messages().await.is_empty());
}
