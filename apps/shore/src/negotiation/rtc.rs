use std::sync::Arc;

use async_trait::async_trait;
use shore_proto::{IceCandidate, SdpType, SessionDescription};
use tracing::{debug, trace, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::track::track_remote::TrackRemote;

use super::{ConnectivityState, EventSink, NegotiationEvent, Negotiator, NegotiatorFactory};
use crate::error::CallError;
use crate::media::{LocalTrack, RemoteTrack, TrackKind};

#[derive(Debug, Clone, Default)]
pub struct RtcNegotiatorFactory {
    ice_servers: Vec<String>,
}

impl RtcNegotiatorFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }

    fn configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl NegotiatorFactory for RtcNegotiatorFactory {
    async fn create(&self, events: EventSink) -> Result<Arc<dyn Negotiator>, CallError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(CallError::negotiation)?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(CallError::negotiation)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(self.configuration())
                .await
                .map_err(CallError::negotiation)?,
        );
        install_hooks(&pc, events);
        Ok(Arc::new(RtcNegotiator { pc }))
    }
}

fn install_hooks(pc: &RTCPeerConnection, events: EventSink) {
    let sink = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let sink = sink.clone();
        Box::pin(async move {
            debug!(target = "shore::negotiation", generation = sink.generation(), ?state, "peer connection state changed");
            sink.emit(NegotiationEvent::ConnectionState(connectivity(state)))
                .await;
        })
    }));

    let sink = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let sink = sink.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                trace!(target = "shore::negotiation", "ice gathering complete");
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    sink.emit(NegotiationEvent::LocalCandidate(from_candidate_init(init)))
                        .await;
                }
                Err(err) => warn!(target = "shore::negotiation", error = %err, "failed to serialize local candidate"),
            }
        })
    }));

    let sink = events;
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
            let sink = sink.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Video => TrackKind::Video,
                    _ => TrackKind::Audio,
                };
                let remote = Arc::new(RemoteTrack::new(track.id().to_string(), kind));
                sink.emit(NegotiationEvent::RemoteTrack(remote)).await;
            })
        },
    ));
}

fn connectivity(state: RTCPeerConnectionState) -> ConnectivityState {
    match state {
        RTCPeerConnectionState::Connecting => ConnectivityState::Connecting,
        RTCPeerConnectionState::Connected => ConnectivityState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectivityState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectivityState::Failed,
        RTCPeerConnectionState::Closed => ConnectivityState::Closed,
        _ => ConnectivityState::New,
    }
}

fn from_candidate_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_candidate_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, CallError> {
    match desc.kind {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
    }
    .map_err(CallError::negotiation)
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription, CallError> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(CallError::Negotiation(format!(
            "unexpected description type {other}"
        ))),
    }
}

/// A `webrtc` peer connection.
pub struct RtcNegotiator {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl Negotiator for RtcNegotiator {
    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(CallError::negotiation)?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(CallError::negotiation)?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(CallError::negotiation)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(CallError::negotiation)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
        self.pc
            .add_ice_candidate(to_candidate_init(candidate))
            .await
            .map_err(CallError::negotiation)
    }

    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<(), CallError> {
        let Some(rtc_track) = track.rtc_track() else {
            return Err(CallError::Negotiation(format!(
                "track {} has no rtc source",
                track.id()
            )));
        };
        let sender = self
            .pc
            .add_track(rtc_track)
            .await
            .map_err(CallError::negotiation)?;

        // Drain RTCP so interceptors keep running.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    fn detach(&self) {
        self.pc
            .on_peer_connection_state_change(Box::new(|_: RTCPeerConnectionState| {
                Box::pin(async {})
            }));
        self.pc
            .on_ice_candidate(Box::new(|_: Option<RTCIceCandidate>| Box::pin(async {})));
        self.pc.on_track(Box::new(
            |_: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
                Box::pin(async {})
            },
        ));
    }

    async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            debug!(target = "shore::negotiation", error = %err, "peer connection close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test_timeout::timeout]
    fn terminal_peer_states_map_to_terminal_connectivity() {
        assert!(connectivity(RTCPeerConnectionState::Failed).is_terminal());
        assert!(connectivity(RTCPeerConnectionState::Disconnected).is_terminal());
        assert!(connectivity(RTCPeerConnectionState::Closed).is_terminal());
        assert!(!connectivity(RTCPeerConnectionState::Connected).is_terminal());
        assert_eq!(
            connectivity(RTCPeerConnectionState::Unspecified),
            ConnectivityState::New
        );
    }

    #[test_timeout::timeout]
    fn stun_list_becomes_single_ice_server() {
        let factory = RtcNegotiatorFactory::new(vec!["stun:stun.example:3478".into()]);
        let config = factory.configuration();
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].urls, vec!["stun:stun.example:3478"]);

        assert!(RtcNegotiatorFactory::default().configuration().ice_servers.is_empty());
    }

    #[test_timeout::tokio_timeout_test(20)]
    async fn two_peer_connections_exchange_offer_and_answer() {
        let (tx, _rx) = mpsc::channel(64);
        let factory = RtcNegotiatorFactory::default();
        let caller = factory.create(EventSink::new(1, tx.clone())).await.unwrap();
        let callee = factory.create(EventSink::new(1, tx)).await.unwrap();

        let devices = crate::media::SyntheticDevices::default();
        let media = crate::media::MediaDevices::acquire(
            &devices,
            crate::media::MediaConstraints::for_call(shore_proto::CallKind::Audio),
        )
        .await
        .unwrap();
        for track in media.tracks() {
            caller.add_track(Arc::clone(track)).await.unwrap();
        }

        let offer = caller.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpType::Offer);
        caller.set_local_description(offer.clone()).await.unwrap();

        callee.set_remote_description(offer).await.unwrap();
        let answer = callee.create_answer().await.unwrap();
        assert_eq!(answer.kind, SdpType::Answer);
        callee.set_local_description(answer.clone()).await.unwrap();
        caller.set_remote_description(answer).await.unwrap();

        caller.detach();
        callee.detach();
        caller.close().await;
        callee.close().await;
    }
}
