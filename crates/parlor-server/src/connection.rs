use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use parlor_core::fingerprint::ConnectionContext;
use parlor_core::ids::ConnectionId;
use parlor_room::RoomHandle;

const SEND_QUEUE: usize = 64;

/// Pump one WebSocket for the life of the connection: outbound frames come
/// from the room actor via a bounded queue, inbound text goes to the actor
/// tagged with this connection's network descriptor.
pub async fn handle_socket(socket: WebSocket, room: RoomHandle, context: ConnectionContext) {
    let connection_id = ConnectionId::new();
    let (tx, mut rx) = mpsc::channel::<String>(SEND_QUEUE);

    if room.connect(connection_id.clone(), tx).await.is_err() {
        info!(connection_id = %connection_id, "room unavailable, closing socket");
        return;
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_tx.send(WsMessage::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = ws_rx.next().await {
        match message {
            WsMessage::Text(text) => {
                if room
                    .inbound(connection_id.clone(), text.to_string(), context.clone())
                    .await
                    .is_err()
                {
                    break;
                }
            }
            WsMessage::Close(_) => break,
            // Pings are answered at the protocol layer; binary is not part
            // of the frame protocol.
            _ => {}
        }
    }

    let _ = room.disconnect(connection_id.clone()).await;
    writer.abort();
    debug!(connection_id = %connection_id, "socket closed");
}
