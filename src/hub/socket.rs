//! Per-connection WebSocket workers.
//!
//! Each accepted socket gets two workers: a reader that enforces the read
//! deadline and interprets client frames, and a writer that drains the
//! connection's outbound queue and emits keepalive pings. Either worker
//! failing unregisters the connection; the other worker then winds down on
//! its own (the reader sees the socket close, the writer sees its queue
//! close).

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::{ConnectionId, HubHandle};
use crate::config::{WS_KEEPALIVE, WS_READ_DEADLINE, WS_WRITE_DEADLINE};
use crate::model::{BusMessage, Principal};

/// Frame shape accepted from clients.
#[derive(Debug, Deserialize)]
struct ClientFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Runs a freshly upgraded socket until it closes.
///
/// Registers the connection (scoped to the principal's user when the request
/// was authenticated), spawns the writer worker, and runs the reader loop on
/// the current task. Always unregisters on exit.
#[instrument(skip_all, fields(user = principal.as_ref().map_or("-", |p| p.user_id.as_str())))]
pub async fn serve_socket(socket: WebSocket, hub: HubHandle, principal: Option<Principal>) {
    let user_id = principal.map(|p| p.user_id);
    let handle = hub.register(user_id).await;
    let connection_id = handle.id.clone();

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(
        sink,
        handle.outbound,
        hub.clone(),
        connection_id.clone(),
    ));

    read_loop(stream, &hub, &connection_id).await;

    // Reader finished (close, error, or deadline): tear the connection down.
    // Unregister closes the outbound queue, which lets the writer drain and
    // send its close frame; the abort is a backstop for a wedged sink.
    hub.unregister(connection_id).await;
    if tokio::time::timeout(std::time::Duration::from_secs(5), &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
}

/// Reads frames until close, error, or read-deadline expiry.
///
/// The deadline resets on every inbound frame, including `pong`s the client
/// sends in reply to keepalives.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    hub: &HubHandle,
    connection_id: &ConnectionId,
) {
    loop {
        let frame = match tokio::time::timeout(WS_READ_DEADLINE, stream.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(error))) => {
                debug!(connection = %connection_id, %error, "read error");
                return;
            }
            Ok(None) => {
                debug!(connection = %connection_id, "client closed");
                return;
            }
            Err(_) => {
                warn!(connection = %connection_id, "read deadline expired, dropping connection");
                return;
            }
        };

        match frame {
            Message::Text(text) => handle_client_frame(hub, connection_id, &text).await,
            Message::Close(_) => {
                debug!(connection = %connection_id, "close frame");
                return;
            }
            // Control frames only reset the deadline.
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }
}

/// Interprets one client text frame.
async fn handle_client_frame(hub: &HubHandle, connection_id: &ConnectionId, text: &str) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(error) => {
            debug!(connection = %connection_id, %error, "ignoring unparseable frame");
            return;
        }
    };

    match frame.kind.as_str() {
        "ping" => {
            hub.send_to_connection(connection_id.clone(), BusMessage::pong())
                .await;
        }
        "join_room" => {
            if let Some(room) = frame.data.get("room").and_then(|r| r.as_str()) {
                hub.join_room(connection_id.clone(), room).await;
            }
        }
        "leave_room" => {
            if let Some(room) = frame.data.get("room").and_then(|r| r.as_str()) {
                hub.leave_room(connection_id.clone(), room).await;
            }
        }
        // Other message kinds belong to higher layers; the hub ignores them.
        other => debug!(connection = %connection_id, kind = other, "unhandled client frame"),
    }
}

/// Drains the outbound queue onto the socket and emits periodic keepalives.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: tokio::sync::mpsc::Receiver<BusMessage>,
    hub: HubHandle,
    connection_id: ConnectionId,
) {
    let mut keepalive = tokio::time::interval(WS_KEEPALIVE);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it.
    keepalive.tick().await;

    loop {
        let message = tokio::select! {
            message = outbound.recv() => match message {
                Some(message) => match serde_json::to_string(&message) {
                    Ok(text) => Message::Text(text),
                    Err(error) => {
                        warn!(connection = %connection_id, %error, "dropping unencodable message");
                        continue;
                    }
                },
                // Queue closed by unregister: clean drain.
                None => {
                    debug!(connection = %connection_id, "outbound queue drained");
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
            },
            _ = keepalive.tick() => Message::Ping(Vec::new()),
        };

        match tokio::time::timeout(WS_WRITE_DEADLINE, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                debug!(connection = %connection_id, %error, "write failed");
                hub.unregister(connection_id).await;
                return;
            }
            Err(_) => {
                warn!(connection = %connection_id, "write deadline expired, dropping connection");
                hub.unregister(connection_id).await;
                return;
            }
        }
    }
}
