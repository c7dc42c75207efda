//! WebSocket link to the relay.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use shore_proto::{ClientMessage, Identity, ServerMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::CallError;
use crate::session::ControllerInput;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Outbound half of signaling as the controller sees it. Sending never blocks.
pub trait SignalSink: Send + Sync {
    fn send(&self, message: ClientMessage) -> Result<(), CallError>;
}

pub struct SignalingClient {
    identity: Identity,
    send_tx: mpsc::UnboundedSender<ClientMessage>,
    incoming: Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SignalingClient {
    pub async fn connect(relay_url: &str, identity: &Identity) -> Result<Arc<Self>, CallError> {
        let websocket_url = derive_websocket_url(relay_url, identity)?;
        let (ws_stream, _) = connect_async(websocket_url.as_str())
            .await
            .map_err(|err| CallError::Signaling(format!("websocket connect failed: {err}")))?;
        debug!(target = "shore::signaling", url = %websocket_url, "signaling websocket connected");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<ServerMessage>();

        let client = Arc::new(SignalingClient {
            identity: identity.clone(),
            send_tx,
            incoming: Mutex::new(Some(incoming_rx)),
            tasks: Mutex::new(Vec::new()),
        });

        let writer_handle = tokio::spawn(async move {
            while let Some(message) = send_rx.recv().await {
                let text = match shore_proto::encode_client(&message) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(target = "shore::signaling", error = %err, "failed to encode signal");
                        continue;
                    }
                };
                if ws_write.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_write.send(Message::Close(None)).await;
        });

        let reader_handle = tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                let decoded = match frame {
                    Ok(Message::Text(text)) => {
                        trace!(target = "shore::signaling", event = "ws_in", kind = "text", len = text.len());
                        shore_proto::decode_server(&text)
                    }
                    Ok(Message::Binary(data)) => {
                        trace!(target = "shore::signaling", event = "ws_in", kind = "binary", len = data.len());
                        shore_proto::decode_server_bytes(&data)
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        match &err {
                            WsError::ConnectionClosed
                            | WsError::AlreadyClosed
                            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                                debug!(target = "shore::signaling", "signaling websocket closed: {err}");
                            }
                            _ => warn!(target = "shore::signaling", "signaling websocket error: {err}"),
                        }
                        break;
                    }
                };
                match decoded {
                    Ok(message) => {
                        if incoming_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(target = "shore::signaling", error = %err, "ignoring malformed relay frame"),
                }
            }
            debug!(target = "shore::signaling", "relay stream ended");
        });

        let heartbeat_tx = client.send_tx.clone();
        let heartbeat_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if heartbeat_tx.send(ClientMessage::Ping).is_err() {
                    break;
                }
            }
        });

        client
            .tasks
            .lock()
            .extend([writer_handle, reader_handle, heartbeat_handle]);
        Ok(client)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Relay messages in arrival order. Only the first caller gets the stream.
    pub fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.incoming.lock().take()
    }

    pub fn close(&self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

impl SignalSink for SignalingClient {
    fn send(&self, message: ClientMessage) -> Result<(), CallError> {
        self.send_tx
            .send(message)
            .map_err(|_| CallError::ChannelClosed)
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.close();
    }
}

/// Feeds relay messages into a controller until either side goes away.
pub fn bridge_signals(
    mut incoming: mpsc::UnboundedReceiver<ServerMessage>,
    inputs: mpsc::Sender<ControllerInput>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = incoming.recv().await {
            if inputs.send(ControllerInput::Signal(message)).await.is_err() {
                break;
            }
        }
    })
}

pub fn derive_websocket_url(relay_url: &str, identity: &Identity) -> Result<Url, CallError> {
    if identity.is_blank() {
        return Err(CallError::Signaling("identity must not be blank".into()));
    }
    let base = Url::parse(relay_url)
        .map_err(|err| CallError::Signaling(format!("invalid relay url {relay_url}: {err}")))?;
    let scheme = match base.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(CallError::Signaling(format!(
                "unsupported relay url scheme {other}"
            )));
        }
    };

    let mut ws = base.clone();
    ws.set_scheme(scheme)
        .map_err(|_| CallError::Signaling("invalid websocket scheme".into()))?;
    let path = base.path().trim_end_matches('/');
    if path.ends_with("/ws") {
        ws.set_path(path);
    } else {
        ws.set_path(&format!("{path}/ws"));
    }
    ws.set_fragment(None);
    ws.query_pairs_mut()
        .clear()
        .append_pair("user_id", identity.as_str());
    Ok(ws)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn http_base_becomes_ws_endpoint() {
        let url = derive_websocket_url("http://relay.example:8080", &Identity::new("alice")).unwrap();
        assert_eq!(url.as_str(), "ws://relay.example:8080/ws?user_id=alice");
    }

    #[test_timeout::timeout]
    fn https_and_existing_ws_path_are_respected() {
        let url = derive_websocket_url("https://relay.example/calls/ws/", &Identity::new("bob")).unwrap();
        assert_eq!(url.as_str(), "wss://relay.example/calls/ws?user_id=bob");
    }

    #[test_timeout::timeout]
    fn identity_is_query_encoded() {
        let url = derive_websocket_url("ws://127.0.0.1:8080", &Identity::new("a b&c")).unwrap();
        assert_eq!(url.query(), Some("user_id=a+b%26c"));
    }

    #[test_timeout::timeout]
    fn blank_identity_and_bad_scheme_are_rejected() {
        assert!(derive_websocket_url("ws://127.0.0.1:8080", &Identity::new("  ")).is_err());
        assert!(derive_websocket_url("ftp://relay.example", &Identity::new("alice")).is_err());
    }
}
