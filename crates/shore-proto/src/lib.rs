//! Signaling contracts shared by the Shore relay and call clients.
//!
//! Every frame on the signaling socket is one JSON object tagged by `type`.
//! Controllers send [`ClientMessage`]s addressed to an [`Identity`]; the relay
//! forwards them as [`ServerMessage`]s stamped with the sender's identity.

mod identity;
mod message;

pub use identity::{CallKind, Identity, PeerProfile};
pub use message::{ClientMessage, IceCandidate, SdpType, ServerMessage, SessionDescription};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("malformed signaling frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("signaling frame is not valid utf-8")]
    NotUtf8,
}

pub fn encode_client(message: &ClientMessage) -> Result<String, ProtoError> {
    Ok(serde_json::to_string(message)?)
}

pub fn decode_client(text: &str) -> Result<ClientMessage, ProtoError> {
    Ok(serde_json::from_str(text)?)
}

pub fn encode_server(message: &ServerMessage) -> Result<String, ProtoError> {
    Ok(serde_json::to_string(message)?)
}

pub fn decode_server(text: &str) -> Result<ServerMessage, ProtoError> {
    Ok(serde_json::from_str(text)?)
}

/// Binary frames are accepted when they carry UTF-8 JSON.
pub fn decode_client_bytes(data: &[u8]) -> Result<ClientMessage, ProtoError> {
    let text = std::str::from_utf8(data).map_err(|_| ProtoError::NotUtf8)?;
    decode_client(text)
}

pub fn decode_server_bytes(data: &[u8]) -> Result<ServerMessage, ProtoError> {
    let text = std::str::from_utf8(data).map_err(|_| ProtoError::NotUtf8)?;
    decode_server(text)
}
