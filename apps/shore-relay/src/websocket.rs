use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use shore_proto::{ClientMessage, Identity, ProtoError, ServerMessage};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::presence::PeerAddress;
use crate::routing::RouteOutcome;
use crate::RelayState;

/// Connection metadata. The identity is supplied once, at upgrade time.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub user_id: Option<String>,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<RelayState>,
) -> Response {
    let identity = match params.user_id.map(Identity::new) {
        Some(identity) if !identity.is_blank() => identity,
        _ => return (StatusCode::BAD_REQUEST, "user_id is required").into_response(),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, identity, state))
}

async fn handle_socket(socket: WebSocket, identity: Identity, state: RelayState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let writer_identity = identity.clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match shore_proto::encode_server(&msg) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(identity = %writer_identity, error = %err, "failed to encode frame"),
            }
        }
        let _ = sender.close().await;
        debug!(identity = %writer_identity, "writer task ended");
    });

    let address = PeerAddress::new(tx.clone());
    let connection_id = address.connection_id;
    if let Some(previous) = state.router.register(identity.clone(), address) {
        info!(
            identity = %identity,
            replaced = %previous.connection_id,
            "identity reconnected; replacing presence entry"
        );
    } else {
        info!(identity = %identity, connection = %connection_id, "identity connected");
    }
    state.router.broadcast_presence();

    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                debug!(identity = %identity, error = %err, "websocket read error");
                break;
            }
        };

        let parsed = match frame {
            Message::Text(text) => shore_proto::decode_client(&text),
            Message::Binary(data) => shore_proto::decode_client_bytes(&data),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match parsed {
            Ok(message) => handle_client_message(&state, &identity, &tx, message),
            Err(err) => {
                warn!(identity = %identity, error = %err, "unparseable signaling frame");
                let _ = tx.send(ServerMessage::Error {
                    message: describe_parse_error(&err),
                });
            }
        }
    }

    if state.router.presence().remove(&identity, connection_id) {
        info!(identity = %identity, "identity disconnected");
        state.router.broadcast_presence();
    } else {
        debug!(identity = %identity, "stale connection closed; newer entry kept");
    }
    drop(tx);
    let _ = writer.await;
}

fn handle_client_message(
    state: &RelayState,
    identity: &Identity,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    message: ClientMessage,
) {
    if matches!(message, ClientMessage::Ping) {
        let _ = tx.send(ServerMessage::Pong);
        return;
    }
    let kind = message.type_name();
    let outcome = state.router.route(identity, message);
    if outcome != RouteOutcome::Delivered {
        debug!(identity = %identity, kind, ?outcome, "signal not delivered");
    }
}

fn describe_parse_error(err: &ProtoError) -> String {
    format!("invalid message format: {err}")
}
