use serde::{Deserialize, Serialize};

use crate::identity::{CallKind, Identity, PeerProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session description in the same JSON shape browsers emit: `{"type": .., "sdp": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Connectivity candidate, shaped like `RTCIceCandidateInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Messages sent from a session controller to the relay. Every variant except
/// `Ping` names the identity it is addressed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Initiate {
        to_user_id: Identity,
        from_user: PeerProfile,
        call_type: CallKind,
    },
    Offer {
        to_user_id: Identity,
        sdp: SessionDescription,
        from_user: PeerProfile,
        call_type: CallKind,
    },
    Accept {
        to_user_id: Identity,
    },
    Answer {
        to_user_id: Identity,
        sdp: SessionDescription,
    },
    Reject {
        to_user_id: Identity,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Busy {
        to_user_id: Identity,
    },
    Candidate {
        to_user_id: Identity,
        candidate: IceCandidate,
    },
    End {
        to_user_id: Identity,
    },
    Ping,
}

impl ClientMessage {
    pub fn target(&self) -> Option<&Identity> {
        match self {
            ClientMessage::Initiate { to_user_id, .. }
            | ClientMessage::Offer { to_user_id, .. }
            | ClientMessage::Accept { to_user_id }
            | ClientMessage::Answer { to_user_id, .. }
            | ClientMessage::Reject { to_user_id, .. }
            | ClientMessage::Busy { to_user_id }
            | ClientMessage::Candidate { to_user_id, .. }
            | ClientMessage::End { to_user_id } => Some(to_user_id),
            ClientMessage::Ping => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::Initiate { .. } => "initiate",
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::Accept { .. } => "accept",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::Reject { .. } => "reject",
            ClientMessage::Busy { .. } => "busy",
            ClientMessage::Candidate { .. } => "candidate",
            ClientMessage::End { .. } => "end",
            ClientMessage::Ping => "ping",
        }
    }
}

/// Messages the relay delivers to a session controller, either forwarded
/// from the peer (stamped with `from_user_id`) or originated by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ring {
        from_user: PeerProfile,
        call_type: CallKind,
    },
    Offer {
        sdp: SessionDescription,
        from_user: PeerProfile,
        call_type: CallKind,
    },
    Accepted {
        from_user_id: Identity,
    },
    Answer {
        sdp: SessionDescription,
        from_user_id: Identity,
    },
    Candidate {
        candidate: IceCandidate,
        from_user_id: Identity,
    },
    Rejected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        from_user_id: Identity,
    },
    Busy {
        from_user_id: Identity,
    },
    Unavailable {
        to_user_id: Identity,
    },
    Ended {
        from_user_id: Identity,
    },
    /// Presence snapshot, broadcast on every connect and disconnect.
    OnlineUsers {
        users: Vec<Identity>,
    },
    Pong,
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::Ring { .. } => "ring",
            ServerMessage::Offer { .. } => "offer",
            ServerMessage::Accepted { .. } => "accepted",
            ServerMessage::Answer { .. } => "answer",
            ServerMessage::Candidate { .. } => "candidate",
            ServerMessage::Rejected { .. } => "rejected",
            ServerMessage::Busy { .. } => "busy",
            ServerMessage::Unavailable { .. } => "unavailable",
            ServerMessage::Ended { .. } => "ended",
            ServerMessage::OnlineUsers { .. } => "online_users",
            ServerMessage::Pong => "pong",
            ServerMessage::Error { .. } => "error",
        }
    }
}
