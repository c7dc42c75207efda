//! Scripted stand-ins for capture devices, negotiators and the relay link.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use shore_proto::{ClientMessage, IceCandidate, SessionDescription};
use tokio::sync::Notify;

use crate::error::CallError;
use crate::media::{LocalMedia, LocalTrack, MediaConstraints, MediaDevices, TrackKind};
use crate::negotiation::{EventSink, NegotiationEvent, Negotiator, NegotiatorFactory};
use crate::signaling::SignalSink;

#[derive(Default)]
pub struct ScriptedDevices {
    failure: Option<String>,
    no_camera: bool,
    gate: Option<Arc<Notify>>,
    requests: Mutex<Vec<MediaConstraints>>,
    issued: Mutex<Vec<Arc<LocalTrack>>>,
}

impl ScriptedDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each acquisition waits for one `notify_one` on the returned gate.
    pub fn gated() -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let devices = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (devices, gate)
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Hands out audio only, whatever the constraints ask for.
    pub fn without_camera() -> Self {
        Self {
            no_camera: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<MediaConstraints> {
        self.requests.lock().clone()
    }

    /// Every track handed out so far, including ones the caller dropped.
    pub fn issued(&self) -> Vec<Arc<LocalTrack>> {
        self.issued.lock().clone()
    }
}

#[async_trait]
impl MediaDevices for ScriptedDevices {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalMedia, CallError> {
        self.requests.lock().push(constraints);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(message) = &self.failure {
            return Err(CallError::Media(message.clone()));
        }
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(Arc::new(LocalTrack::new(TrackKind::Audio)));
        }
        if constraints.video && !self.no_camera {
            tracks.push(Arc::new(LocalTrack::new(TrackKind::Video)));
        }
        self.issued.lock().extend(tracks.iter().cloned());
        Ok(LocalMedia::new(tracks))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NegotiatorCall {
    CreateOffer,
    CreateAnswer,
    SetLocal(SessionDescription),
    SetRemote(SessionDescription),
    AddCandidate(IceCandidate),
    AddTrack(String),
    Detach,
    Close,
}

pub struct ScriptedNegotiator {
    index: usize,
    events: EventSink,
    fail_answer: bool,
    calls: Mutex<Vec<NegotiatorCall>>,
    detached: AtomicBool,
}

impl ScriptedNegotiator {
    pub fn calls(&self) -> Vec<NegotiatorCall> {
        self.calls.lock().clone()
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                NegotiatorCall::AddCandidate(candidate) => Some(candidate.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.calls.lock().contains(&NegotiatorCall::Close)
    }

    /// Fires a callback the way a real peer connection would. Detached
    /// negotiators stay silent.
    pub async fn emit(&self, event: NegotiationEvent) -> bool {
        if self.is_detached() {
            return false;
        }
        self.events.emit(event).await
    }

    fn record(&self, call: NegotiatorCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl Negotiator for ScriptedNegotiator {
    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        self.record(NegotiatorCall::CreateOffer);
        Ok(SessionDescription::offer(format!("offer-{}", self.index)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        self.record(NegotiatorCall::CreateAnswer);
        if self.fail_answer {
            return Err(CallError::Negotiation("scripted answer failure".into()));
        }
        Ok(SessionDescription::answer(format!("answer-{}", self.index)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        self.record(NegotiatorCall::SetLocal(desc));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        self.record(NegotiatorCall::SetRemote(desc));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
        self.record(NegotiatorCall::AddCandidate(candidate));
        Ok(())
    }

    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<(), CallError> {
        self.record(NegotiatorCall::AddTrack(track.id().to_string()));
        Ok(())
    }

    fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
        self.record(NegotiatorCall::Detach);
    }

    async fn close(&self) {
        self.record(NegotiatorCall::Close);
    }
}

#[derive(Default)]
pub struct ScriptedNegotiatorFactory {
    fail_answer: bool,
    created: Mutex<Vec<Arc<ScriptedNegotiator>>>,
}

impl ScriptedNegotiatorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_answers() -> Self {
        Self {
            fail_answer: true,
            ..Self::default()
        }
    }

    pub fn created(&self) -> Vec<Arc<ScriptedNegotiator>> {
        self.created.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<ScriptedNegotiator>> {
        self.created.lock().last().cloned()
    }
}

#[async_trait]
impl NegotiatorFactory for ScriptedNegotiatorFactory {
    async fn create(&self, events: EventSink) -> Result<Arc<dyn Negotiator>, CallError> {
        let mut created = self.created.lock();
        let negotiator = Arc::new(ScriptedNegotiator {
            index: created.len(),
            events,
            fail_answer: self.fail_answer,
            calls: Mutex::new(Vec::new()),
            detached: AtomicBool::new(false),
        });
        created.push(Arc::clone(&negotiator));
        Ok(negotiator)
    }
}

/// Captures everything the controller sends.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<ClientMessage>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<ClientMessage> {
        self.sent.lock().clone()
    }

    pub fn take(&self) -> Vec<ClientMessage> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn type_names(&self) -> Vec<&'static str> {
        self.sent.lock().iter().map(ClientMessage::type_name).collect()
    }
}

impl SignalSink for RecordingSink {
    fn send(&self, message: ClientMessage) -> Result<(), CallError> {
        self.sent.lock().push(message);
        Ok(())
    }
}
