use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use bookclub_db::Database;
use bookclub_types::events::{GatewayCommand, GatewayEvent};
use bookclub_types::models::ChatMessage;

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single WebSocket connection. The user id was supplied as a query
/// parameter at handshake time; the dispatcher assigns the socket id and the
/// User Directory records the association for the lifetime of the connection.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: Uuid,
) {
    let (mut sender, receiver) = socket.split();

    let (socket_id, user_rx) = dispatcher.register(user_id).await;

    info!("{} connected to relay as socket {}", user_id, socket_id);

    record_socket(&db, user_id, socket_id).await;

    // Send Ready event
    let ready = GatewayEvent::Ready { user_id, socket_id };
    let ready_sent = match serde_json::to_string(&ready) {
        Ok(text) => sender.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            warn!("failed to encode Ready event: {}", e);
            false
        }
    };

    if ready_sent {
        run_connection_loop(sender, receiver, dispatcher.clone(), user_id, user_rx).await;
    }

    dispatcher.unregister(user_id, socket_id).await;
    clear_socket(&db, socket_id).await;
    info!("{} disconnected from relay (socket {})", user_id, socket_id);
}

/// Record the connection in the user directory. A handshake naming an
/// unknown user still gets a live relay connection; only the directory
/// entry is skipped.
async fn record_socket(db: &Arc<Database>, user_id: Uuid, socket_id: Uuid) {
    let db = db.clone();
    let uid = user_id.to_string();
    let sid = socket_id.to_string();
    match tokio::task::spawn_blocking(move || db.set_socket(&uid, &sid)).await {
        Ok(Ok(true)) => {}
        Ok(Ok(false)) => warn!("socket handshake for unknown user {}", user_id),
        Ok(Err(e)) => warn!("failed to record socket for {}: {}", user_id, e),
        Err(e) => warn!("spawn_blocking join error: {}", e),
    }
}

/// Disconnect events only carry the socket id, so the directory clears by it.
async fn clear_socket(db: &Arc<Database>, socket_id: Uuid) {
    let db = db.clone();
    let sid = socket_id.to_string();
    match tokio::task::spawn_blocking(move || db.clear_socket(&sid)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!("failed to clear socket {}: {}", socket_id, e),
        Err(e) => warn!("spawn_blocking join error: {}", e),
    }
}

async fn run_connection_loop(
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut receiver: futures_util::stream::SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    user_id: Uuid,
    mut user_rx: mpsc::UnboundedReceiver<GatewayEvent>,
) {
    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };

                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("failed to encode event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let dispatcher_recv = dispatcher.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&dispatcher_recv, user_id, cmd).await,
                    Err(e) => {
                        // Malformed frames are skipped, never fatal
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            user_id,
                            e,
                            truncate_frame(&text, 200)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

/// Cap logged frame text without slicing inside a multibyte character.
/// Remote input must never be able to panic the recv task.
fn truncate_frame(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

async fn handle_command(dispatcher: &Dispatcher, user_id: Uuid, cmd: GatewayCommand) {
    match cmd {
        GatewayCommand::SendPrivateMessage {
            sender,
            receiver,
            text,
        } => {
            let message = ChatMessage {
                sender,
                receiver,
                text,
            };
            let delivered = dispatcher
                .send_to_user(receiver, GatewayEvent::PrivateMessageReceived { message })
                .await;

            // Offline receiver: drop silently, never error the sender
            if !delivered {
                info!("{} -> {}: receiver offline, message dropped", user_id, receiver);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_malformed_frame_truncates_on_char_boundary() {
        // 199 ASCII bytes followed by multibyte characters straddling byte 200
        let frame = format!("{}こんにちは", "a".repeat(199));
        assert!(frame.len() > 200);

        // Unparseable, so it reaches the truncated log line
        assert!(serde_json::from_str::<GatewayCommand>(&frame).is_err());

        let logged = truncate_frame(&frame, 200);
        assert!(logged.len() <= 200);
        assert!(logged.starts_with("aaa"));
        // Walking back to the boundary keeps the result valid UTF-8
        assert!(logged.is_char_boundary(logged.len()));
    }

    #[test]
    fn short_frames_are_logged_whole() {
        assert_eq!(truncate_frame("not json", 200), "not json");
        assert_eq!(truncate_frame("héllo", 200), "héllo");
    }
}
