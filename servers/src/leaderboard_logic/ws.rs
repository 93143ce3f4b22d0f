//! Websocket transport for the subscription hub: connection upgrade, the
//! per-connection read/write tasks, keepalive, and the inbound
//! subscribe/unsubscribe/ping protocol.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::timeout;

use lib_ranking::core::hub::{HubHandle, SubscriberId, SUBSCRIBER_QUEUE_CAPACITY};
use lib_ranking::core::WireMessage;

use crate::leaderboard_logic::state::AppState;

/// Time allowed for one outbound frame to be written.
const WRITE_WAIT: Duration = Duration::from_secs(10);

/// A connection that stays silent this long is considered dead.
const PONG_WAIT: Duration = Duration::from_secs(60);

/// Keepalive ping period; must fire comfortably inside `PONG_WAIT`.
const PING_PERIOD: Duration = Duration::from_millis(PONG_WAIT.as_millis() as u64 * 9 / 10);

/// Maximum accepted inbound frame size.
const MAX_MESSAGE_SIZE: usize = 4096;

/// Inbound client frame.
#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    leaderboard_id: String,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state.hub))
}

async fn handle_socket(socket: WebSocket, hub: HubHandle) {
    let (outbound_tx, outbound_rx) = mpsc::channel::<String>(SUBSCRIBER_QUEUE_CAPACITY);
    let subscriber_id = hub.register(outbound_tx.clone()).await;
    log::debug!("new websocket connection {subscriber_id}");

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_pump(sink, outbound_rx));

    read_pump(stream, &hub, subscriber_id, &outbound_tx).await;

    // Unregistering drops the hub's sender; with ours gone too the write
    // pump sees the closed queue and sends the close frame.
    hub.unregister(subscriber_id).await;
    drop(outbound_tx);
    let _ = writer.await;
    log::debug!("websocket connection {subscriber_id} closed");
}

/// Drain the subscriber queue onto the socket and keep the connection alive
/// with periodic pings. Exits when the queue closes or a write fails.
async fn write_pump(
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<String>,
) {
    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + PING_PERIOD,
        PING_PERIOD,
    );

    loop {
        tokio::select! {
            maybe = outbound_rx.recv() => match maybe {
                Some(payload) => {
                    match timeout(WRITE_WAIT, sink.send(Message::Text(payload.into()))).await {
                        Ok(Ok(())) => {}
                        _ => return,
                    }
                }
                None => {
                    // Queue closed by the hub: say goodbye properly.
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
            },
            _ = ping.tick() => {
                match timeout(WRITE_WAIT, sink.send(Message::Ping(Vec::new().into()))).await {
                    Ok(Ok(())) => {}
                    _ => return,
                }
            }
        }
    }
}

/// Consume inbound frames until the peer goes away or stays silent past the
/// liveness deadline.
async fn read_pump(
    mut stream: futures_util::stream::SplitStream<WebSocket>,
    hub: &HubHandle,
    subscriber_id: SubscriberId,
    outbound_tx: &mpsc::Sender<String>,
) {
    loop {
        let frame = match timeout(PONG_WAIT, stream.next()).await {
            Err(_) => {
                log::debug!("websocket {subscriber_id} timed out");
                return;
            }
            Ok(None) => return,
            Ok(Some(Err(err))) => {
                log::debug!("websocket {subscriber_id} read error: {err}");
                return;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => {
                handle_client_message(text.as_str(), hub, subscriber_id, outbound_tx).await;
            }
            Message::Close(_) => return,
            // Pings are answered by the protocol layer; pongs just refresh
            // the liveness deadline by arriving.
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }
}

async fn handle_client_message(
    text: &str,
    hub: &HubHandle,
    subscriber_id: SubscriberId,
    outbound_tx: &mpsc::Sender<String>,
) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(_) => {
            log::warn!("websocket {subscriber_id}: invalid message format");
            send_direct(outbound_tx, WireMessage::error("invalid message format"));
            return;
        }
    };

    match message.message_type.as_str() {
        "subscribe" => {
            if message.leaderboard_id.is_empty() {
                send_direct(
                    outbound_tx,
                    WireMessage::error("leaderboard_id required for subscribe"),
                );
                return;
            }
            hub.subscribe(subscriber_id, &message.leaderboard_id).await;
            send_direct(
                outbound_tx,
                WireMessage::ack("subscribed", &message.leaderboard_id),
            );
        }
        "unsubscribe" => {
            if message.leaderboard_id.is_empty() {
                send_direct(
                    outbound_tx,
                    WireMessage::error("leaderboard_id required for unsubscribe"),
                );
                return;
            }
            hub.unsubscribe(subscriber_id, &message.leaderboard_id).await;
            send_direct(
                outbound_tx,
                WireMessage::ack("unsubscribed", &message.leaderboard_id),
            );
        }
        "ping" => send_direct(outbound_tx, WireMessage::pong()),
        other => log::debug!("websocket {subscriber_id}: unknown message type {other:?}"),
    }
}

/// Protocol replies share the subscriber's bounded queue; under pressure
/// they are dropped just like broadcasts.
fn send_direct(outbound_tx: &mpsc::Sender<String>, message: WireMessage) {
    let _ = outbound_tx.try_send(message.to_json());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_parse() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","leaderboard_id":"daily"}"#).unwrap();
        assert_eq!(msg.message_type, "subscribe");
        assert_eq!(msg.leaderboard_id, "daily");

        // leaderboard_id is optional at the parse level; the handler
        // enforces it per message type.
        let ping: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping.message_type, "ping");
        assert!(ping.leaderboard_id.is_empty());

        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"leaderboard_id":"x"}"#).is_err());
    }

    #[test]
    fn keepalive_fires_inside_liveness_deadline() {
        assert!(PING_PERIOD < PONG_WAIT);
        assert_eq!(PING_PERIOD, Duration::from_secs(54));
    }
}
