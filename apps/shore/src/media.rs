//! Local capture and received media.
//!
//! The controller owns [`LocalMedia`] and [`RemoteMedia`] for exactly one call;
//! stopping a track is final. Capture itself sits behind [`MediaDevices`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use shore_proto::CallKind;
use tracing::debug;
use uuid::Uuid;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::CallError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub fn for_call(kind: CallKind) -> Self {
        Self {
            audio: true,
            video: kind.wants_video(),
        }
    }
}

pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    rtc: Option<Arc<TrackLocalStaticSample>>,
}

impl LocalTrack {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            rtc: None,
        }
    }

    pub fn with_rtc(kind: TrackKind, rtc: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            id: rtc.id().to_string(),
            rtc: Some(rtc),
            ..Self::new(kind)
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// No effect once the track is stopped.
    pub fn set_enabled(&self, enabled: bool) {
        if !self.is_stopped() {
            self.enabled.store(enabled, Ordering::SeqCst);
        }
    }

    pub fn stop(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!(target = "shore::media", track = %self.id, kind = ?self.kind, "local track stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn rtc_track(&self) -> Option<Arc<dyn TrackLocal + Send + Sync>> {
        self.rtc
            .as_ref()
            .map(|track| Arc::clone(track) as Arc<dyn TrackLocal + Send + Sync>)
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct LocalMedia {
    tracks: Vec<Arc<LocalTrack>>,
}

impl LocalMedia {
    pub fn new(tracks: Vec<Arc<LocalTrack>>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[Arc<LocalTrack>] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &Arc<LocalTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &Arc<LocalTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn push(&mut self, track: Arc<LocalTrack>) {
        self.tracks.push(track);
    }

    pub fn has_video(&self) -> bool {
        self.video_tracks().next().is_some()
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn enabled_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_enabled()).count()
    }
}

#[derive(Debug)]
pub struct RemoteTrack {
    id: String,
    kind: TrackKind,
    stopped: AtomicBool,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Tracks received from the peer. Starts empty when negotiation begins.
#[derive(Debug, Default)]
pub struct RemoteMedia {
    tracks: Vec<Arc<RemoteTrack>>,
}

impl RemoteMedia {
    pub fn push(&mut self, track: Arc<RemoteTrack>) {
        self.tracks.push(track);
    }

    pub fn tracks(&self) -> &[Arc<RemoteTrack>] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Capture capability. Implementations may take arbitrarily long (permission
/// prompts, device enumeration).
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalMedia, CallError>;
}

/// Produces real `webrtc` sample tracks with no capture source behind them.
#[derive(Debug, Clone)]
pub struct SyntheticDevices {
    stream_id: String,
}

impl SyntheticDevices {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
        }
    }

    fn track(&self, kind: TrackKind) -> Arc<LocalTrack> {
        let mime_type = match kind {
            TrackKind::Audio => MIME_TYPE_OPUS,
            TrackKind::Video => MIME_TYPE_VP8,
        };
        let label = match kind {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        };
        let rtc = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            format!("{label}-{}", Uuid::new_v4()),
            self.stream_id.clone(),
        ));
        Arc::new(LocalTrack::with_rtc(kind, rtc))
    }
}

impl Default for SyntheticDevices {
    fn default() -> Self {
        Self::new("shore")
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalMedia, CallError> {
        if !constraints.audio && !constraints.video {
            return Err(CallError::Media("no media requested".into()));
        }
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(self.track(TrackKind::Audio));
        }
        if constraints.video {
            tracks.push(self.track(TrackKind::Video));
        }
        Ok(LocalMedia::new(tracks))
    }
}
