use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("media unavailable: {0}")]
    Media(String),
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("signaling setup failed: {0}")]
    Signaling(String),
    #[error("signaling channel closed")]
    ChannelClosed,
    #[error("session controller stopped")]
    ControllerStopped,
    #[error("cannot call peer: {0}")]
    InvalidPeer(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl CallError {
    pub(crate) fn negotiation(err: impl std::fmt::Display) -> Self {
        CallError::Negotiation(err.to_string())
    }
}
