//! Device WebSocket.
//!
//! One socket is one connection. Text frames carry `DeviceMessage` JSON;
//! everything the coordinator queues for the connection goes back as
//! `ServerMessage` JSON. Closing the socket unregisters the device, but
//! only if this connection is still the device's current one.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tracing::{debug, info, warn};

use swarmgrid_core::DeviceMessage;

use crate::ApiState;

/// GET /ws
pub async fn device_socket(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(move |socket| serve_device(socket, state))
}

async fn serve_device(mut socket: WebSocket, state: ApiState) {
    let (connection_id, mut outbound) = state.hub.connect().await;
    info!(%connection_id, "device socket opened");

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&state, &connection_id, text.as_str()).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(%connection_id, error = %e, "device socket error");
                    break;
                }
            },
            message = outbound.recv() => {
                let Some(message) = message else { break };
                match serde_json::to_string(&message) {
                    Ok(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(%connection_id, error = %e, "failed to encode server message"),
                }
            }
        }
    }

    state.hub.disconnect(&connection_id).await;
    let removed = state
        .swarm
        .with(|c| c.unregister_device(&connection_id))
        .await;
    info!(%connection_id, removed, "device socket closed");
}

/// Decode one frame and hand it to the coordinator. Malformed frames are
/// logged and dropped.
async fn handle_frame(state: &ApiState, connection_id: &str, text: &str) {
    match serde_json::from_str::<DeviceMessage>(text) {
        Ok(message) => {
            state
                .swarm
                .with(|c| c.handle_device_message(connection_id, message))
                .await;
        }
        Err(e) => {
            warn!(%connection_id, error = %e, "malformed device message dropped");
        }
    }
}
