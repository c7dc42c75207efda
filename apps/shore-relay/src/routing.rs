use std::sync::Arc;

use shore_proto::{ClientMessage, Identity, ServerMessage};
use tracing::{debug, trace};

use crate::presence::{PeerAddress, PresenceDirectory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered,
    /// Target offline; the sender was told `unavailable`.
    Unavailable,
    /// Target offline (or its writer closed); message discarded.
    Dropped,
    /// Not a routable message (e.g. `ping`).
    Ignored,
}

/// Forwards signaling messages between identities. Holds no call state.
#[derive(Clone)]
pub struct SignalRouter {
    presence: Arc<dyn PresenceDirectory>,
}

impl SignalRouter {
    pub fn new(presence: Arc<dyn PresenceDirectory>) -> Self {
        Self { presence }
    }

    pub fn presence(&self) -> &Arc<dyn PresenceDirectory> {
        &self.presence
    }

    pub fn route(&self, from: &Identity, message: ClientMessage) -> RouteOutcome {
        let kind = message.type_name();
        let Some(target) = message.target().cloned() else {
            return RouteOutcome::Ignored;
        };
        let is_initiate = matches!(message, ClientMessage::Initiate { .. });
        let is_end = matches!(message, ClientMessage::End { .. });

        // The sender learns the call is over even when the peer is gone.
        if is_end {
            self.notify(
                from,
                ServerMessage::Ended {
                    from_user_id: from.clone(),
                },
            );
        }

        let Some(address) = self.presence.lookup(&target) else {
            if is_initiate {
                debug!(from = %from, to = %target, "initiate to offline identity");
                self.notify(
                    from,
                    ServerMessage::Unavailable {
                        to_user_id: target,
                    },
                );
                return RouteOutcome::Unavailable;
            }
            debug!(from = %from, to = %target, kind, "dropping message to offline identity");
            return RouteOutcome::Dropped;
        };

        let forwarded = forward(from, message);
        trace!(from = %from, to = %target, kind, "forwarding signal");
        if address.deliver(forwarded) {
            RouteOutcome::Delivered
        } else {
            debug!(from = %from, to = %target, kind, "target writer closed; dropping");
            RouteOutcome::Dropped
        }
    }

    /// Sends the current presence set to every connected identity.
    pub fn broadcast_presence(&self) {
        let users = self.presence.snapshot();
        for address in self.presence.addresses() {
            let _ = address.deliver(ServerMessage::OnlineUsers {
                users: users.clone(),
            });
        }
    }

    fn notify(&self, identity: &Identity, message: ServerMessage) {
        if let Some(address) = self.presence.lookup(identity) {
            let _ = address.deliver(message);
        }
    }

    pub fn register(&self, identity: Identity, address: PeerAddress) -> Option<PeerAddress> {
        self.presence.set(identity, address)
    }
}

/// Rewrites a controller message into what the addressed peer receives.
fn forward(from: &Identity, message: ClientMessage) -> ServerMessage {
    let from_user_id = from.clone();
    match message {
        ClientMessage::Initiate {
            mut from_user,
            call_type,
            ..
        } => {
            from_user.id = from_user_id;
            ServerMessage::Ring {
                from_user,
                call_type,
            }
        }
        ClientMessage::Offer {
            sdp,
            mut from_user,
            call_type,
            ..
        } => {
            from_user.id = from_user_id;
            ServerMessage::Offer {
                sdp,
                from_user,
                call_type,
            }
        }
        ClientMessage::Accept { .. } => ServerMessage::Accepted { from_user_id },
        ClientMessage::Answer { sdp, .. } => ServerMessage::Answer { sdp, from_user_id },
        ClientMessage::Reject { reason, .. } => ServerMessage::Rejected {
            reason,
            from_user_id,
        },
        ClientMessage::Busy { .. } => ServerMessage::Busy { from_user_id },
        ClientMessage::Candidate { candidate, .. } => ServerMessage::Candidate {
            candidate,
            from_user_id,
        },
        ClientMessage::End { .. } => ServerMessage::Ended { from_user_id },
        // target() already filtered this out
        ClientMessage::Ping => ServerMessage::Pong,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::InMemoryPresence;
    use shore_proto::{CallKind, IceCandidate, PeerProfile, SessionDescription};
    use tokio::sync::mpsc;

    fn router() -> SignalRouter {
        SignalRouter::new(Arc::new(InMemoryPresence::new()))
    }

    fn connect(router: &SignalRouter, id: &str) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        router.register(id.into(), PeerAddress::new(tx));
        rx
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test_timeout::timeout]
    fn initiate_to_offline_identity_only_replies_unavailable() {
        let router = router();
        let mut alice = connect(&router, "alice");

        let outcome = router.route(
            &"alice".into(),
            ClientMessage::Initiate {
                to_user_id: "zed".into(),
                from_user: PeerProfile::new("alice"),
                call_type: CallKind::Audio,
            },
        );

        assert_eq!(outcome, RouteOutcome::Unavailable);
        assert_eq!(
            drain(&mut alice),
            vec![ServerMessage::Unavailable {
                to_user_id: "zed".into()
            }]
        );
        assert!(router.presence().lookup(&"zed".into()).is_none());
    }

    #[test_timeout::timeout]
    fn other_messages_to_offline_identity_are_dropped_silently() {
        let router = router();
        let mut alice = connect(&router, "alice");
        let outcome = router.route(
            &"alice".into(),
            ClientMessage::Candidate {
                to_user_id: "zed".into(),
                candidate: IceCandidate::new("candidate:0"),
            },
        );
        assert_eq!(outcome, RouteOutcome::Dropped);
        assert!(drain(&mut alice).is_empty());
    }

    #[test_timeout::timeout]
    fn initiate_and_offer_become_ring_and_offer() {
        let router = router();
        let _alice = connect(&router, "alice");
        let mut bob = connect(&router, "bob");
        let caller = PeerProfile::new("alice").with_display_name("Alice");

        router.route(
            &"alice".into(),
            ClientMessage::Initiate {
                to_user_id: "bob".into(),
                from_user: caller.clone(),
                call_type: CallKind::Video,
            },
        );
        router.route(
            &"alice".into(),
            ClientMessage::Offer {
                to_user_id: "bob".into(),
                sdp: SessionDescription::offer("v=0"),
                from_user: caller.clone(),
                call_type: CallKind::Video,
            },
        );

        assert_eq!(
            drain(&mut bob),
            vec![
                ServerMessage::Ring {
                    from_user: caller.clone(),
                    call_type: CallKind::Video
                },
                ServerMessage::Offer {
                    sdp: SessionDescription::offer("v=0"),
                    from_user: caller,
                    call_type: CallKind::Video
                },
            ]
        );
    }

    #[test_timeout::timeout]
    fn caller_profile_id_is_taken_from_the_connection() {
        let router = router();
        let _mallory = connect(&router, "mallory");
        let mut bob = connect(&router, "bob");
        let claimed = PeerProfile::new("alice").with_display_name("Alice");

        router.route(
            &"mallory".into(),
            ClientMessage::Initiate {
                to_user_id: "bob".into(),
                from_user: claimed.clone(),
                call_type: CallKind::Audio,
            },
        );
        router.route(
            &"mallory".into(),
            ClientMessage::Offer {
                to_user_id: "bob".into(),
                sdp: SessionDescription::offer("v=0"),
                from_user: claimed,
                call_type: CallKind::Audio,
            },
        );

        let stamped = PeerProfile::new("mallory").with_display_name("Alice");
        assert_eq!(
            drain(&mut bob),
            vec![
                ServerMessage::Ring {
                    from_user: stamped.clone(),
                    call_type: CallKind::Audio
                },
                ServerMessage::Offer {
                    sdp: SessionDescription::offer("v=0"),
                    from_user: stamped,
                    call_type: CallKind::Audio
                },
            ]
        );
    }

    #[test_timeout::timeout]
    fn forwarded_messages_are_stamped_with_sender() {
        let router = router();
        let _bob = connect(&router, "bob");
        let mut alice = connect(&router, "alice");

        router.route(&"bob".into(), ClientMessage::Accept { to_user_id: "alice".into() });
        router.route(
            &"bob".into(),
            ClientMessage::Reject {
                to_user_id: "alice".into(),
                reason: Some("declined".into()),
            },
        );
        router.route(&"bob".into(), ClientMessage::Busy { to_user_id: "alice".into() });

        assert_eq!(
            drain(&mut alice),
            vec![
                ServerMessage::Accepted {
                    from_user_id: "bob".into()
                },
                ServerMessage::Rejected {
                    reason: Some("declined".into()),
                    from_user_id: "bob".into()
                },
                ServerMessage::Busy {
                    from_user_id: "bob".into()
                },
            ]
        );
    }

    #[test_timeout::timeout]
    fn end_is_forwarded_and_echoed_to_sender() {
        let router = router();
        let mut alice = connect(&router, "alice");
        let mut bob = connect(&router, "bob");

        let outcome = router.route(&"alice".into(), ClientMessage::End { to_user_id: "bob".into() });

        assert_eq!(outcome, RouteOutcome::Delivered);
        assert_eq!(
            drain(&mut bob),
            vec![ServerMessage::Ended {
                from_user_id: "alice".into()
            }]
        );
        assert_eq!(
            drain(&mut alice),
            vec![ServerMessage::Ended {
                from_user_id: "alice".into()
            }]
        );
    }

    #[test_timeout::timeout]
    fn ping_is_not_routed() {
        let router = router();
        let mut alice = connect(&router, "alice");
        assert_eq!(router.route(&"alice".into(), ClientMessage::Ping), RouteOutcome::Ignored);
        assert!(drain(&mut alice).is_empty());
    }

    #[test_timeout::timeout]
    fn presence_broadcast_reaches_everyone() {
        let router = router();
        let mut alice = connect(&router, "alice");
        let mut bob = connect(&router, "bob");
        router.broadcast_presence();
        let expected = ServerMessage::OnlineUsers {
            users: vec!["alice".into(), "bob".into()],
        };
        assert_eq!(drain(&mut alice), vec![expected.clone()]);
        assert_eq!(drain(&mut bob), vec![expected]);
    }
}
