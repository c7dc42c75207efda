//! Per-client call state.
//!
//! [`SessionController`] owns at most one [`CallSession`] and is the only
//! writer of it. Commands, relay signals, negotiator callbacks and background
//! completions all arrive as [`ControllerInput`] on one queue and are handled
//! one at a time.

mod controller;
mod handle;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use shore_proto::{CallKind, Identity, IceCandidate, PeerProfile, ServerMessage, SessionDescription};
use tracing::debug;

use crate::error::CallError;
use crate::media::{LocalMedia, RemoteMedia};
use crate::negotiation::{NegotiationEvent, NegotiationWorker, Negotiator};

pub use controller::{ControllerConfig, SessionController};
pub use handle::ControllerHandle;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CallState {
    #[default]
    Idle,
    Outgoing,
    Ringing,
    InCall,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CallState::Idle => "idle",
            CallState::Outgoing => "outgoing",
            CallState::Ringing => "ringing",
            CallState::InCall => "in-call",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Caller,
    Callee,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartCall { peer: PeerProfile, kind: CallKind },
    Accept,
    Reject { reason: Option<String> },
    End,
    ToggleMute,
    ToggleCamera,
}

/// Everything the controller loop reacts to.
#[derive(Debug)]
pub enum ControllerInput {
    Command(Command),
    Signal(ServerMessage),
    Negotiation {
        generation: u64,
        event: NegotiationEvent,
    },
    Completion(Completion),
    Shutdown,
}

/// Results of work the controller started off-loop. Each carries the
/// generation that started it.
#[derive(Debug)]
pub enum Completion {
    Prepared {
        generation: u64,
        role: Role,
        result: Result<Prepared, CallError>,
    },
    OfferReady {
        generation: u64,
        result: Result<SessionDescription, CallError>,
    },
    AnswerReady {
        generation: u64,
        result: Result<SessionDescription, CallError>,
    },
    AnswerApplied {
        generation: u64,
        result: Result<(), CallError>,
    },
    RingTimeout {
        generation: u64,
    },
}

/// Local media plus a negotiator with that media attached.
pub struct Prepared {
    pub media: LocalMedia,
    pub negotiator: Arc<dyn Negotiator>,
}

impl Prepared {
    /// Releases resources that arrived for a session that no longer exists.
    pub(crate) fn release(self) {
        self.media.stop_all();
        self.negotiator.detach();
        let negotiator = self.negotiator;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { negotiator.close().await });
        }
    }
}

impl fmt::Debug for Prepared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prepared")
            .field("media", &self.media)
            .finish_non_exhaustive()
    }
}

/// The one active (or idle) call.
#[derive(Default)]
pub struct CallSession {
    generation: u64,
    state: CallState,
    role: Option<Role>,
    kind: Option<CallKind>,
    peer: Option<PeerProfile>,
    pending_offer: Option<SessionDescription>,
    pending_answer: Option<SessionDescription>,
    pending_candidates: VecDeque<IceCandidate>,
    outbound_candidates: Vec<IceCandidate>,
    local_media: Option<LocalMedia>,
    remote_media: Option<RemoteMedia>,
    worker: Option<NegotiationWorker>,
    announced: bool,
    remote_offer_applied: bool,
    peer_accepted: bool,
}

impl CallSession {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn kind(&self) -> Option<CallKind> {
        self.kind
    }

    pub fn peer(&self) -> Option<&PeerProfile> {
        self.peer.as_ref()
    }

    pub fn peer_id(&self) -> Option<&Identity> {
        self.peer.as_ref().map(|p| &p.id)
    }

    pub fn is_peer(&self, id: &Identity) -> bool {
        self.peer_id() == Some(id)
    }

    pub fn pending_offer(&self) -> Option<&SessionDescription> {
        self.pending_offer.as_ref()
    }

    pub fn pending_answer(&self) -> Option<&SessionDescription> {
        self.pending_answer.as_ref()
    }

    pub fn pending_candidates(&self) -> impl Iterator<Item = &IceCandidate> {
        self.pending_candidates.iter()
    }

    pub fn local_media(&self) -> Option<&LocalMedia> {
        self.local_media.as_ref()
    }

    pub fn remote_media(&self) -> Option<&RemoteMedia> {
        self.remote_media.as_ref()
    }

    pub fn has_negotiator(&self) -> bool {
        self.worker.is_some()
    }

    /// True when nothing from a previous call is still held.
    pub fn is_quiescent(&self) -> bool {
        self.state == CallState::Idle
            && self.role.is_none()
            && self.kind.is_none()
            && self.peer.is_none()
            && self.pending_offer.is_none()
            && self.pending_answer.is_none()
            && self.pending_candidates.is_empty()
            && self.outbound_candidates.is_empty()
            && self.local_media.is_none()
            && self.remote_media.is_none()
            && self.worker.is_none()
    }

    fn begin(&mut self, state: CallState, role: Role, peer: PeerProfile, kind: CallKind) {
        self.generation = self.generation.wrapping_add(1);
        self.state = state;
        self.role = Some(role);
        self.peer = Some(peer);
        self.kind = Some(kind);
    }

    /// Releases everything the session holds and returns to idle. Never
    /// fails and may be called any number of times.
    fn teardown(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
        if let Some(media) = self.local_media.take() {
            media.stop_all();
        }
        if let Some(media) = self.remote_media.take() {
            media.stop_all();
        }
        self.pending_offer = None;
        self.pending_answer = None;
        self.pending_candidates.clear();
        self.outbound_candidates.clear();
        if self.state != CallState::Idle {
            debug!(target = "shore::session", generation = self.generation, from = %self.state, "session torn down");
        }
        self.state = CallState::Idle;
        self.role = None;
        self.kind = None;
        self.peer = None;
        self.announced = false;
        self.remote_offer_applied = false;
        self.peer_accepted = false;
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// What the UI sees.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallSnapshot {
    /// Bumped when a call starts and when it is torn down.
    pub generation: u64,
    pub state: CallState,
    pub kind: Option<CallKind>,
    pub peer: Option<PeerProfile>,
    pub muted: bool,
    pub camera_on: bool,
    pub local_tracks: usize,
    pub remote_tracks: usize,
    pub online_users: Vec<Identity>,
}

impl CallSnapshot {
    fn capture(session: &CallSession, online_users: &[Identity]) -> Self {
        let (muted, camera_on, local_tracks) = match session.local_media() {
            Some(media) => {
                let has_audio = media.audio_tracks().next().is_some();
                let audio_on = media.audio_tracks().any(|t| t.is_enabled());
                let video_on = media.video_tracks().any(|t| t.is_enabled());
                (has_audio && !audio_on, video_on, media.tracks().len())
            }
            None => (false, false, 0),
        };
        Self {
            generation: session.generation(),
            state: session.state(),
            kind: session.kind(),
            peer: session.peer().cloned(),
            muted,
            camera_on,
            local_tracks,
            remote_tracks: session.remote_media().map_or(0, RemoteMedia::len),
            online_users: online_users.to_vec(),
        }
    }
}
