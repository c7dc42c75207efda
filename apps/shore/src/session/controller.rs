use std::sync::Arc;
use std::time::Duration;

use shore_proto::{CallKind, ClientMessage, IceCandidate, Identity, PeerProfile, ServerMessage, SessionDescription};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use super::{
    CallSession, CallSnapshot, CallState, Command, Completion, ControllerHandle, ControllerInput,
    Prepared, Role,
};
use crate::error::CallError;
use crate::media::{MediaConstraints, MediaDevices, RemoteMedia};
use crate::negotiation::{
    ConnectivityState, EventSink, NegotiationEvent, NegotiationOp, NegotiationWorker, NegotiatorFactory,
};
use crate::signaling::SignalSink;

const INPUT_CAPACITY: usize = 256;
pub const DEFAULT_RING_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub identity: PeerProfile,
    /// Unanswered outgoing calls are ended after this long. `None` disables.
    pub ring_timeout: Option<Duration>,
}

impl ControllerConfig {
    pub fn new(identity: PeerProfile) -> Self {
        Self {
            identity,
            ring_timeout: Some(DEFAULT_RING_TIMEOUT),
        }
    }

    pub fn with_ring_timeout(mut self, ring_timeout: Option<Duration>) -> Self {
        self.ring_timeout = ring_timeout;
        self
    }

    /// Whether `peer` can be called from this identity at all.
    pub fn check_callee(&self, peer: &Identity) -> Result<(), CallError> {
        if peer.is_blank() {
            return Err(CallError::InvalidPeer("identity is blank".to_string()));
        }
        if *peer == self.identity.id {
            return Err(CallError::InvalidPeer(format!("{peer} is this client")));
        }
        Ok(())
    }
}

pub struct SessionController {
    config: ControllerConfig,
    session: CallSession,
    devices: Arc<dyn MediaDevices>,
    factory: Arc<dyn NegotiatorFactory>,
    signals: Arc<dyn SignalSink>,
    inputs: mpsc::Receiver<ControllerInput>,
    input_tx: mpsc::Sender<ControllerInput>,
    snapshots: watch::Sender<CallSnapshot>,
    online_users: Vec<Identity>,
    stopped: bool,
}

impl SessionController {
    pub fn new(
        config: ControllerConfig,
        devices: Arc<dyn MediaDevices>,
        factory: Arc<dyn NegotiatorFactory>,
        signals: Arc<dyn SignalSink>,
    ) -> (Self, ControllerHandle) {
        let (input_tx, inputs) = mpsc::channel(INPUT_CAPACITY);
        let (snapshots, snapshot_rx) = watch::channel(CallSnapshot::default());
        let handle = ControllerHandle::new(input_tx.clone(), snapshot_rx);
        let controller = Self {
            config,
            session: CallSession::default(),
            devices,
            factory,
            signals,
            inputs,
            input_tx,
            snapshots,
            online_users: Vec::new(),
            stopped: false,
        };
        (controller, handle)
    }

    pub fn identity(&self) -> &Identity {
        &self.config.identity.id
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot::capture(&self.session, &self.online_users)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Processes inputs until [`ControllerInput::Shutdown`].
    pub async fn run(mut self) {
        info!(target = "shore::session", identity = %self.config.identity.id, "session controller started");
        while !self.stopped {
            let Some(input) = self.inputs.recv().await else {
                break;
            };
            self.handle(input);
        }
        self.teardown();
        info!(target = "shore::session", identity = %self.config.identity.id, "session controller stopped");
    }

    /// Processes inputs until none arrive for `quiet`. Lets callers drive the
    /// controller step by step without spawning it.
    pub async fn run_until_quiet(&mut self, quiet: Duration) {
        while !self.stopped {
            match tokio::time::timeout(quiet, self.inputs.recv()).await {
                Ok(Some(input)) => self.handle(input),
                Ok(None) | Err(_) => break,
            }
        }
    }

    /// Drops the current call without telling the peer.
    pub fn teardown(&mut self) {
        self.session.teardown();
        self.publish();
    }

    pub fn handle(&mut self, input: ControllerInput) {
        match input {
            ControllerInput::Command(command) => self.handle_command(command),
            ControllerInput::Signal(message) => self.handle_signal(message),
            ControllerInput::Negotiation { generation, event } => {
                self.handle_negotiation(generation, event)
            }
            ControllerInput::Completion(completion) => self.handle_completion(completion),
            ControllerInput::Shutdown => {
                self.end_call("controller shutdown");
                self.stopped = true;
            }
        }
        self.publish();
    }

    fn publish(&self) {
        let next = self.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn send(&self, message: ClientMessage) {
        trace!(target = "shore::session", kind = message.type_name(), to = ?message.target(), "sending signal");
        if let Err(err) = self.signals.send(message) {
            warn!(target = "shore::session", error = %err, "failed to send signal");
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        generation == self.session.generation
    }

    /// Sends `end` to the peer when asked and there is one, then tears down.
    fn terminate(&mut self, notify_peer: bool, reason: &str) {
        if notify_peer {
            if let Some(peer) = self.session.peer_id().cloned() {
                self.send(ClientMessage::End { to_user_id: peer });
            }
        }
        info!(target = "shore::session", state = %self.session.state, reason, "call ended");
        self.session.teardown();
    }

    fn end_call(&mut self, reason: &str) {
        if self.session.state != CallState::Idle {
            self.terminate(true, reason);
        }
    }

    // ----- local commands -----

    fn handle_command(&mut self, command: Command) {
        debug!(target = "shore::session", ?command, state = %self.session.state, "command");
        match command {
            Command::StartCall { peer, kind } => self.start_call(peer, kind),
            Command::Accept => self.accept(),
            Command::Reject { reason } => self.reject(reason),
            Command::End => self.end_call("local hangup"),
            Command::ToggleMute => self.toggle_mute(),
            Command::ToggleCamera => self.toggle_camera(),
        }
    }

    fn start_call(&mut self, peer: PeerProfile, kind: CallKind) {
        if let Err(err) = self.config.check_callee(&peer.id) {
            warn!(target = "shore::session", error = %err, "refusing to start call");
            return;
        }
        self.end_call("replaced by a new call");

        info!(target = "shore::session", peer = %peer.id, %kind, "starting call");
        self.session
            .begin(CallState::Outgoing, Role::Caller, peer, kind);
        self.spawn_prepare(Role::Caller, kind);

        if let Some(ring_timeout) = self.config.ring_timeout {
            let generation = self.session.generation;
            let tx = self.input_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(ring_timeout).await;
                let _ = tx
                    .send(ControllerInput::Completion(Completion::RingTimeout { generation }))
                    .await;
            });
        }
    }

    fn accept(&mut self) {
        if self.session.state != CallState::Ringing {
            warn!(target = "shore::session", state = %self.session.state, "nothing to accept");
            return;
        }
        let Some(kind) = self.session.kind else {
            return;
        };
        self.session.state = CallState::InCall;
        self.spawn_prepare(Role::Callee, kind);
    }

    fn reject(&mut self, reason: Option<String>) {
        if self.session.state != CallState::Ringing {
            warn!(target = "shore::session", state = %self.session.state, "nothing to reject");
            return;
        }
        if let Some(peer) = self.session.peer_id().cloned() {
            self.send(ClientMessage::Reject {
                to_user_id: peer,
                reason,
            });
        }
        self.session.teardown();
    }

    fn toggle_mute(&mut self) {
        let Some(media) = self.session.local_media.as_ref() else {
            debug!(target = "shore::session", "no local media to mute");
            return;
        };
        let unmuted = media.audio_tracks().any(|t| t.is_enabled());
        for track in media.audio_tracks() {
            track.set_enabled(!unmuted);
        }
    }

    fn toggle_camera(&mut self) {
        let Some(media) = self.session.local_media.as_ref() else {
            debug!(target = "shore::session", "no local media for camera toggle");
            return;
        };
        if media.has_video() {
            let on = media.video_tracks().any(|t| t.is_enabled());
            for track in media.video_tracks() {
                track.set_enabled(!on);
            }
            return;
        }
        // Calls are never renegotiated, so a new track would stay local.
        warn!(
            target = "shore::session",
            kind = ?self.session.kind,
            "no camera track in this call; adding one mid-call is not supported"
        );
    }

    fn spawn_prepare(&self, role: Role, kind: CallKind) {
        let generation = self.session.generation;
        let devices = Arc::clone(&self.devices);
        let factory = Arc::clone(&self.factory);
        let tx = self.input_tx.clone();
        let events = EventSink::new(generation, tx.clone());
        tokio::spawn(async move {
            let result = prepare(devices, factory, MediaConstraints::for_call(kind), events).await;
            let _ = tx
                .send(ControllerInput::Completion(Completion::Prepared {
                    generation,
                    role,
                    result,
                }))
                .await;
        });
    }

    // ----- relayed signals -----

    fn handle_signal(&mut self, message: ServerMessage) {
        trace!(target = "shore::session", kind = message.type_name(), state = %self.session.state, "signal");
        match message {
            ServerMessage::Ring {
                from_user,
                call_type,
            } => self.on_incoming(from_user, call_type, None),
            ServerMessage::Offer {
                sdp,
                from_user,
                call_type,
            } => self.on_incoming(from_user, call_type, Some(sdp)),
            ServerMessage::Accepted { from_user_id } => {
                if self.session.is_peer(&from_user_id) && self.session.state == CallState::Outgoing {
                    info!(target = "shore::session", peer = %from_user_id, "peer accepted");
                    self.session.peer_accepted = true;
                }
            }
            ServerMessage::Answer { sdp, from_user_id } => self.on_answer(from_user_id, sdp),
            ServerMessage::Candidate {
                candidate,
                from_user_id,
            } => self.on_remote_candidate(from_user_id, candidate),
            ServerMessage::Rejected {
                from_user_id,
                reason,
            } => {
                let reason = reason.unwrap_or_else(|| "rejected".to_string());
                self.on_remote_terminal(&from_user_id, &reason)
            }
            ServerMessage::Busy { from_user_id } => self.on_remote_terminal(&from_user_id, "busy"),
            ServerMessage::Unavailable { to_user_id } => {
                self.on_remote_terminal(&to_user_id, "unavailable")
            }
            ServerMessage::Ended { from_user_id } => {
                if from_user_id == self.config.identity.id {
                    trace!(target = "shore::session", "relay echo of our own end");
                    return;
                }
                self.on_remote_terminal(&from_user_id, "ended by peer")
            }
            ServerMessage::OnlineUsers { users } => {
                self.online_users = users;
            }
            ServerMessage::Pong => {}
            ServerMessage::Error { message } => {
                warn!(target = "shore::session", %message, "relay reported an error");
            }
        }
    }

    fn on_incoming(&mut self, from: PeerProfile, kind: CallKind, offer: Option<SessionDescription>) {
        let state = self.session.state;
        let from_peer = self.session.is_peer(&from.id);

        match state {
            CallState::Idle => {
                info!(target = "shore::session", peer = %from.id, %kind, "incoming call");
                self.session.begin(CallState::Ringing, Role::Callee, from, kind);
                self.session.pending_offer = offer;
            }
            CallState::Ringing if from_peer => {
                if let Some(offer) = offer {
                    self.session.pending_offer = Some(offer);
                }
            }
            CallState::InCall if from_peer && self.session.role == Some(Role::Callee) => {
                let Some(offer) = offer else {
                    return;
                };
                if self.session.remote_offer_applied {
                    debug!(target = "shore::session", "ignoring offer after negotiation started");
                } else if let Some(worker) = self.session.worker.as_ref() {
                    worker.submit(NegotiationOp::AnswerOffer(offer));
                    self.session.remote_offer_applied = true;
                } else {
                    self.session.pending_offer = Some(offer);
                }
            }
            _ if from_peer => {
                debug!(target = "shore::session", %state, "ignoring call start from current peer");
            }
            _ => {
                // A second caller gets one busy, on ring; its offer is dropped.
                if offer.is_none() {
                    info!(target = "shore::session", caller = %from.id, "busy; declining second call");
                    self.send(ClientMessage::Busy {
                        to_user_id: from.id,
                    });
                }
            }
        }
    }

    fn on_answer(&mut self, from: Identity, answer: SessionDescription) {
        if self.session.role != Some(Role::Caller)
            || !self.session.is_peer(&from)
            || !matches!(self.session.state, CallState::Outgoing | CallState::InCall)
        {
            debug!(target = "shore::session", %from, "ignoring unexpected answer");
            return;
        }
        if self.session.state == CallState::InCall {
            debug!(target = "shore::session", "ignoring duplicate answer");
            return;
        }
        self.session.state = CallState::InCall;
        match self.session.worker.as_ref() {
            Some(worker) => worker.submit(NegotiationOp::ApplyAnswer(answer)),
            None => self.session.pending_answer = Some(answer),
        }
    }

    fn on_remote_candidate(&mut self, from: Identity, candidate: IceCandidate) {
        if self.session.state == CallState::Idle || !self.session.is_peer(&from) {
            trace!(target = "shore::session", %from, "dropping candidate for no session");
            return;
        }
        match self.session.worker.as_ref() {
            Some(worker) => worker.submit(NegotiationOp::AddCandidate(candidate)),
            None => self.session.pending_candidates.push_back(candidate),
        }
    }

    fn on_remote_terminal(&mut self, peer: &Identity, reason: &str) {
        if self.session.state == CallState::Idle || !self.session.is_peer(peer) {
            debug!(target = "shore::session", %peer, reason, "ignoring terminal signal for no session");
            return;
        }
        self.terminate(false, reason);
    }

    // ----- negotiator callbacks -----

    fn handle_negotiation(&mut self, generation: u64, event: NegotiationEvent) {
        if !self.is_current(generation) {
            trace!(target = "shore::session", generation, "discarding stale negotiation event");
            if let NegotiationEvent::RemoteTrack(track) = event {
                track.stop();
            }
            return;
        }
        match event {
            NegotiationEvent::LocalCandidate(candidate) => {
                let Some(peer) = self.session.peer_id().cloned() else {
                    return;
                };
                if self.session.announced {
                    self.send(ClientMessage::Candidate {
                        to_user_id: peer,
                        candidate,
                    });
                } else {
                    self.session.outbound_candidates.push(candidate);
                }
            }
            NegotiationEvent::RemoteTrack(track) => {
                debug!(target = "shore::session", track = track.id(), kind = ?track.kind(), "remote track");
                self.session
                    .remote_media
                    .get_or_insert_with(RemoteMedia::default)
                    .push(track);
            }
            NegotiationEvent::ConnectionState(state) => {
                debug!(target = "shore::session", %state, "connectivity changed");
                if state == ConnectivityState::Connected {
                    info!(target = "shore::session", "media connected");
                }
                if state.is_terminal() && self.session.state != CallState::Idle {
                    self.terminate(true, "transport lost");
                }
            }
        }
    }

    // ----- background completions -----

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Prepared {
                generation,
                role,
                result,
            } => self.on_prepared(generation, role, result),
            Completion::OfferReady { generation, result } => self.on_offer_ready(generation, result),
            Completion::AnswerReady { generation, result } => {
                self.on_answer_ready(generation, result)
            }
            Completion::AnswerApplied { generation, result } => {
                if !self.is_current(generation) {
                    return;
                }
                if let Err(err) = result {
                    warn!(target = "shore::session", error = %err, "remote answer rejected");
                    self.terminate(true, "negotiation failed");
                }
            }
            Completion::RingTimeout { generation } => {
                if !self.is_current(generation) || self.session.state != CallState::Outgoing {
                    return;
                }
                if self.session.peer_accepted {
                    debug!(target = "shore::session", "ring timeout ignored; peer already accepted");
                    return;
                }
                self.terminate(true, "no answer");
            }
        }
    }

    fn on_prepared(&mut self, generation: u64, role: Role, result: Result<Prepared, CallError>) {
        let expected = match role {
            Role::Caller => CallState::Outgoing,
            Role::Callee => CallState::InCall,
        };
        let current = self.is_current(generation)
            && self.session.role == Some(role)
            && self.session.worker.is_none()
            && (self.session.state == expected
                || (role == Role::Caller && self.session.state == CallState::InCall));
        if !current {
            if let Ok(prepared) = result {
                debug!(target = "shore::session", generation, "releasing media for a superseded call");
                prepared.release();
            }
            return;
        }

        let prepared = match result {
            Ok(prepared) => prepared,
            Err(err) => {
                warn!(target = "shore::session", error = %err, ?role, "call setup failed");
                // The caller has not announced anything yet.
                self.terminate(role == Role::Callee, "setup failed");
                return;
            }
        };

        let worker = NegotiationWorker::spawn(prepared.negotiator, generation, self.input_tx.clone());
        self.session.local_media = Some(prepared.media);
        self.session.remote_media.get_or_insert_with(RemoteMedia::default);

        match role {
            Role::Caller => {
                worker.submit(NegotiationOp::CreateOffer);
                if let Some(answer) = self.session.pending_answer.take() {
                    worker.submit(NegotiationOp::ApplyAnswer(answer));
                }
            }
            Role::Callee => {
                if let Some(offer) = self.session.pending_offer.take() {
                    worker.submit(NegotiationOp::AnswerOffer(offer));
                    self.session.remote_offer_applied = true;
                }
            }
        }
        for candidate in self.session.pending_candidates.drain(..) {
            worker.submit(NegotiationOp::AddCandidate(candidate));
        }
        self.session.worker = Some(worker);
    }

    fn on_offer_ready(&mut self, generation: u64, result: Result<SessionDescription, CallError>) {
        if !self.is_current(generation) || self.session.role != Some(Role::Caller) {
            return;
        }
        let (Some(peer), Some(kind)) = (self.session.peer_id().cloned(), self.session.kind) else {
            return;
        };
        match result {
            Ok(offer) => {
                self.send(ClientMessage::Initiate {
                    to_user_id: peer.clone(),
                    from_user: self.config.identity.clone(),
                    call_type: kind,
                });
                self.send(ClientMessage::Offer {
                    to_user_id: peer,
                    sdp: offer,
                    from_user: self.config.identity.clone(),
                    call_type: kind,
                });
                self.session.announced = true;
                self.flush_outbound_candidates();
            }
            Err(err) => {
                warn!(target = "shore::session", error = %err, "offer generation failed");
                self.terminate(false, "negotiation failed");
            }
        }
    }

    fn on_answer_ready(&mut self, generation: u64, result: Result<SessionDescription, CallError>) {
        if !self.is_current(generation) || self.session.role != Some(Role::Callee) {
            return;
        }
        let Some(peer) = self.session.peer_id().cloned() else {
            return;
        };
        match result {
            Ok(answer) => {
                self.send(ClientMessage::Accept {
                    to_user_id: peer.clone(),
                });
                self.send(ClientMessage::Answer {
                    to_user_id: peer,
                    sdp: answer,
                });
                self.session.announced = true;
                self.flush_outbound_candidates();
            }
            Err(err) => {
                warn!(target = "shore::session", error = %err, "answer generation failed");
                self.terminate(true, "negotiation failed");
            }
        }
    }

    fn flush_outbound_candidates(&mut self) {
        let Some(peer) = self.session.peer_id().cloned() else {
            return;
        };
        for candidate in std::mem::take(&mut self.session.outbound_candidates) {
            self.send(ClientMessage::Candidate {
                to_user_id: peer.clone(),
                candidate,
            });
        }
    }
}

async fn prepare(
    devices: Arc<dyn MediaDevices>,
    factory: Arc<dyn NegotiatorFactory>,
    constraints: MediaConstraints,
    events: EventSink,
) -> Result<Prepared, CallError> {
    let media = devices.acquire(constraints).await?;
    let negotiator = match factory.create(events).await {
        Ok(negotiator) => negotiator,
        Err(err) => {
            media.stop_all();
            return Err(err);
        }
    };
    for track in media.tracks() {
        if let Err(err) = negotiator.add_track(Arc::clone(track)).await {
            warn!(target = "shore::session", error = %err, track = track.id(), "failed to attach local track");
        }
    }
    Ok(Prepared { media, negotiator })
}
