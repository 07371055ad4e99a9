//! mychannel-chat-tail: follow a stream's chat from the terminal.
//!
//! ```text
//! mychannel-chat-tail <stream-id> [config.json]
//! ```
//!
//! Prints chat activity as it arrives. Lines typed on stdin are sent as
//! messages; Ctrl-C disconnects. Set `RUST_LOG=mychannel_chat=debug` for
//! connection diagnostics.

use log::{error, info};
use mychannel_chat::{ChatClient, ChatConfig, ChatEvent, ConnectionState};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

fn load_config(path: Option<&str>) -> Result<ChatConfig, String> {
    let Some(path) = path else {
        return Ok(ChatConfig::default());
    };
    let raw = std::fs::read_to_string(path).map_err(|e| format!("Cannot read {path}: {e}"))?;
    ChatConfig::from_json(&raw).map_err(|e| format!("Invalid config {path}: {e}"))
}

fn print_event(event: ChatEvent) {
    match event {
        ChatEvent::MessageReceived(msg) => match msg.super_chat_amount {
            Some(amount) => println!("[${amount:.2}] {}: {}", msg.username, msg.content),
            None => println!("{}: {}", msg.username, msg.content),
        },
        ChatEvent::MessageRemoved(id) => println!("-- message {id} removed"),
        ChatEvent::UserJoined(user) => println!("-- {} joined", user.display_name),
        ChatEvent::UserLeft(id) => println!("-- {id} left"),
        ChatEvent::StateChanged(state) => println!("== {}", state.label()),
        ChatEvent::QueueDrained { sent, remaining } => {
            println!("== replayed {sent} queued messages ({remaining} still queued)")
        }
        ChatEvent::Error(e) => println!("!! {e}"),
        _ => {}
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(stream_id) = args.first().cloned() else {
        eprintln!("usage: mychannel-chat-tail <stream-id> [config.json]");
        std::process::exit(2);
    };
    let config = match load_config(args.get(1).map(String::as_str)) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(2);
        }
    };

    info!("Tailing chat for stream {stream_id} at {}", config.endpoint);
    let client = ChatClient::new(config);
    let mut events = client.subscribe();

    if let Err(e) = client.connect(&stream_id).await {
        error!("{e}");
        std::process::exit(1);
    }

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let fatal = matches!(event, ChatEvent::StateChanged(ConnectionState::Error(_)));
                    print_event(event);
                    if fatal {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => info!("Skipped {skipped} events"),
                Err(RecvError::Closed) => break,
            },
            line = input.next_line(), if stdin_open => match line {
                Ok(Some(line)) if !line.trim().is_empty() => {
                    if let Err(e) = client.send_text(&line).await {
                        println!("!! {e}");
                    }
                }
                Ok(Some(_)) => {}
                // Keep tailing without input
                Ok(None) | Err(_) => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.disconnect().await;
}
