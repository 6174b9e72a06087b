//! WebSocket transport for live observers.
//!
//! Push-only: inbound frames other than close are ignored.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};

use crate::broadcast::hub::{BroadcastHub, Subscription};

/// Register the socket with the hub and forward events until either side goes away.
pub async fn serve_observer(socket: WebSocket, hub: Arc<BroadcastHub>, user: String) {
    let Subscription { id, mut events } = hub.register(user);
    let (mut sink, mut inbound) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => {
                // None: the hub evicted us.
                let Some(event) = event else { break };
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(observer = %id, error = %e, "Failed to encode event");
                        continue;
                    }
                };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            frame = inbound.next() => {
                match frame {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    hub.unregister(id);
    let _ = sink.close().await;
}
