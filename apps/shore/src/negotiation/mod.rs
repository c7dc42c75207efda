//! The peer-connection capability the session controller drives.
//!
//! A [`Negotiator`] wraps one transport object for one call. Its callbacks are
//! delivered as [`NegotiationEvent`]s through an [`EventSink`] stamped with
//! the session generation they belong to, so the controller can discard
//! events from a torn-down call.

mod rtc;
mod worker;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use shore_proto::{IceCandidate, SessionDescription};
use tokio::sync::mpsc;

use crate::error::CallError;
use crate::media::{LocalTrack, RemoteTrack};
use crate::session::ControllerInput;

pub use rtc::{RtcNegotiator, RtcNegotiatorFactory};
pub use worker::{NegotiationOp, NegotiationWorker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectivityState {
    /// States after which the call cannot recover.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectivityState::Disconnected | ConnectivityState::Failed | ConnectivityState::Closed
        )
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectivityState::New => "new",
            ConnectivityState::Connecting => "connecting",
            ConnectivityState::Connected => "connected",
            ConnectivityState::Disconnected => "disconnected",
            ConnectivityState::Failed => "failed",
            ConnectivityState::Closed => "closed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub enum NegotiationEvent {
    LocalCandidate(IceCandidate),
    RemoteTrack(Arc<RemoteTrack>),
    ConnectionState(ConnectivityState),
}

/// Where a negotiator reports its callbacks.
#[derive(Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::Sender<ControllerInput>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::Sender<ControllerInput>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the controller is gone.
    pub async fn emit(&self, event: NegotiationEvent) -> bool {
        self.tx
            .send(ControllerInput::Negotiation {
                generation: self.generation,
                event,
            })
            .await
            .is_ok()
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("generation", &self.generation)
            .finish()
    }
}

#[async_trait]
pub trait Negotiator: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, CallError>;
    async fn create_answer(&self) -> Result<SessionDescription, CallError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), CallError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError>;
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<(), CallError>;
    /// Stops callback delivery. Must not block.
    fn detach(&self);
    async fn close(&self);
}

#[async_trait]
pub trait NegotiatorFactory: Send + Sync {
    async fn create(&self, events: EventSink) -> Result<Arc<dyn Negotiator>, CallError>;
}
