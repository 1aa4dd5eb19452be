//! Loopback media engine
//!
//! Simulated capture devices and a simulated transport. A peer connection
//! reports `connected` once both descriptions are in place and at least one
//! remote candidate has been added, then hands over a remote stream built
//! from the media sections of the remote description. Used by the demo binary
//! and the scenario tests.

use crate::domain::media::{
    IceCandidateInit, IceServer, MediaConstraints, MediaEngine, MediaError, MediaResult,
    MediaStream, MediaTrack, PeerConnection, PeerConnectionState, PeerEvent, PeerEventSender,
    SdpType, SessionDescription, SignalingState, TrackKind, TrackReadyState, TransportStats,
};
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

/// Simulated capture or remote track
#[derive(Debug)]
pub struct LoopbackTrack {
    id: String,
    kind: TrackKind,
    ended: AtomicBool,
    enabled: AtomicBool,
}

impl LoopbackTrack {
    fn new(kind: TrackKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            ended: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
        }
    }
}

impl MediaTrack for LoopbackTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn ready_state(&self) -> TrackReadyState {
        if self.ended.load(Ordering::SeqCst) {
            TrackReadyState::Ended
        } else {
            TrackReadyState::Live
        }
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }
}

/// Network conditions reported by the simulated transport
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkProfile {
    /// Fraction of packets lost (0.0 - 1.0)
    pub loss: f64,
    pub jitter_ms: f64,
    pub rtt_ms: f64,
}

impl Default for LinkProfile {
    fn default() -> Self {
        Self {
            loss: 0.0,
            jitter_ms: 4.0,
            rtt_ms: 30.0,
        }
    }
}

/// Device behaviour to simulate
#[derive(Debug, Clone, Default)]
struct DeviceSetup {
    deny_permission: bool,
    no_camera: bool,
    busy: bool,
}

#[derive(Default)]
struct EngineState {
    tracks: Vec<Arc<LoopbackTrack>>,
    connections: Vec<Arc<LoopbackPeerConnection>>,
}

/// Media engine with simulated devices and transport
#[derive(Clone)]
pub struct LoopbackMediaEngine {
    devices: DeviceSetup,
    link: Arc<Mutex<LinkProfile>>,
    state: Arc<Mutex<EngineState>>,
}

impl Default for LoopbackMediaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackMediaEngine {
    pub fn new() -> Self {
        Self {
            devices: DeviceSetup::default(),
            link: Arc::new(Mutex::new(LinkProfile::default())),
            state: Arc::new(Mutex::new(EngineState::default())),
        }
    }

    /// Every capture request fails with `permission-denied`
    pub fn deny_permission(mut self) -> Self {
        self.devices.deny_permission = true;
        self
    }

    /// Microphone present, camera missing
    pub fn without_camera(mut self) -> Self {
        self.devices.no_camera = true;
        self
    }

    /// Devices held by another application
    pub fn busy(mut self) -> Self {
        self.devices.busy = true;
        self
    }

    /// Change the conditions reported by every connection
    pub fn set_link(&self, profile: LinkProfile) {
        *lock(&self.link) = profile;
    }

    /// Captured tracks that have not been stopped yet
    pub fn live_track_count(&self) -> usize {
        lock(&self.state)
            .tracks
            .iter()
            .filter(|t| t.ready_state() == TrackReadyState::Live)
            .count()
    }

    pub fn acquired_track_count(&self) -> usize {
        lock(&self.state).tracks.len()
    }

    /// Peer connections that have not been closed yet
    pub fn open_connection_count(&self) -> usize {
        lock(&self.state)
            .connections
            .iter()
            .filter(|pc| !pc.is_closed())
            .count()
    }

    fn capture(&self, kind: TrackKind) -> MediaResult<Arc<LoopbackTrack>> {
        if self.devices.deny_permission {
            return Err(MediaError::PermissionDenied);
        }
        if self.devices.busy {
            return Err(MediaError::DeviceBusy);
        }
        if kind == TrackKind::Video && self.devices.no_camera {
            return Err(MediaError::DeviceNotFound);
        }

        let track = Arc::new(LoopbackTrack::new(kind));
        lock(&self.state).tracks.push(track.clone());
        Ok(track)
    }
}

#[async_trait]
impl MediaEngine for LoopbackMediaEngine {
    async fn get_local_stream(&self, constraints: MediaConstraints) -> MediaResult<MediaStream> {
        if !constraints.audio && !constraints.video {
            return Err(MediaError::ConstraintsUnsatisfiable);
        }

        let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();
        let wanted = [
            (constraints.audio, TrackKind::Audio),
            (constraints.video, TrackKind::Video),
        ];

        for (wanted, kind) in wanted {
            if !wanted {
                continue;
            }
            match self.capture(kind) {
                Ok(track) => tracks.push(track),
                Err(e) => {
                    // Release whatever was acquired before the failure
                    for track in &tracks {
                        track.stop();
                    }
                    return Err(e);
                }
            }
        }

        debug!(tracks = tracks.len(), "Local stream acquired");
        Ok(MediaStream::new(Uuid::new_v4().to_string(), tracks))
    }

    async fn create_peer_connection(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventSender,
    ) -> MediaResult<Arc<dyn PeerConnection>> {
        let pc = Arc::new(LoopbackPeerConnection::new(events, self.link.clone()));
        lock(&self.state).connections.push(pc.clone());

        debug!(ice_servers = ice_servers.len(), "Loopback peer connection created");
        Ok(pc)
    }
}

#[derive(Default)]
struct ConnectionState {
    local_kinds: Vec<TrackKind>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    signaling: Option<SignalingState>,
    remote_candidates: usize,
    connected: bool,
    closed: bool,
    remote_stream: Option<MediaStream>,
    packets: u64,
}

/// Simulated peer connection
pub struct LoopbackPeerConnection {
    events: PeerEventSender,
    link: Arc<Mutex<LinkProfile>>,
    state: Mutex<ConnectionState>,
    candidates_emitted: AtomicUsize,
}

impl LoopbackPeerConnection {
    fn new(events: PeerEventSender, link: Arc<Mutex<LinkProfile>>) -> Self {
        let _ = events.send(PeerEvent::ConnectionState(PeerConnectionState::New));
        Self {
            events,
            link,
            state: Mutex::new(ConnectionState::default()),
            candidates_emitted: AtomicUsize::new(0),
        }
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    fn emit(&self, event: PeerEvent) {
        // Receiver gone means the session already unwound
        let _ = self.events.send(event);
    }

    fn build_sdp(kinds: &[TrackKind]) -> String {
        let mut sdp = format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            rand::thread_rng().gen::<u32>()
        );
        for (mid, kind) in kinds.iter().enumerate() {
            match kind {
                TrackKind::Audio => {
                    sdp.push_str("m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n");
                    sdp.push_str(&format!("a=mid:{}\r\n", mid));
                    sdp.push_str("a=rtpmap:111 opus/48000/2\r\n");
                }
                TrackKind::Video => {
                    sdp.push_str("m=video 9 UDP/TLS/RTP/SAVPF 96\r\n");
                    sdp.push_str(&format!("a=mid:{}\r\n", mid));
                    sdp.push_str("a=rtpmap:96 VP8/90000\r\n");
                }
            }
        }
        sdp
    }

    fn media_kinds(sdp: &str) -> Vec<TrackKind> {
        sdp.lines()
            .filter_map(|line| {
                if line.starts_with("m=audio") {
                    Some(TrackKind::Audio)
                } else if line.starts_with("m=video") {
                    Some(TrackKind::Video)
                } else {
                    None
                }
            })
            .collect()
    }

    /// One host candidate per media section
    fn gather(&self, kinds: &[TrackKind]) {
        for (mid, _) in kinds.iter().enumerate() {
            let n = self.candidates_emitted.fetch_add(1, Ordering::SeqCst) + 1;
            let port: u16 = rand::thread_rng().gen_range(49152..65535);
            self.emit(PeerEvent::IceCandidate(IceCandidateInit {
                candidate: format!(
                    "candidate:{} 1 udp 2130706431 127.0.0.1 {} typ host",
                    n, port
                ),
                sdp_mid: Some(mid.to_string()),
                sdp_mline_index: Some(mid as u16),
            }));
        }
    }

    /// Report `connected` once negotiation and connectivity checks are done
    fn try_connect(&self, state: &mut ConnectionState) {
        if state.connected
            || state.closed
            || state.local.is_none()
            || state.remote_candidates == 0
        {
            return;
        }
        let Some(remote) = state.remote.as_ref() else {
            return;
        };

        let tracks: Vec<Arc<dyn MediaTrack>> = Self::media_kinds(&remote.sdp)
            .into_iter()
            .map(|kind| Arc::new(LoopbackTrack::new(kind)) as Arc<dyn MediaTrack>)
            .collect();
        let stream = MediaStream::new(Uuid::new_v4().to_string(), tracks);

        state.connected = true;
        state.remote_stream = Some(stream.clone());

        info!("Loopback transport connected");
        self.emit(PeerEvent::ConnectionState(PeerConnectionState::Connected));
        self.emit(PeerEvent::Track(stream));
    }

    fn closed_error() -> MediaError {
        MediaError::Negotiation("peer connection is closed".to_string())
    }
}

#[async_trait]
impl PeerConnection for LoopbackPeerConnection {
    async fn add_stream(&self, stream: &MediaStream) -> MediaResult<()> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(Self::closed_error());
        }
        state
            .local_kinds
            .extend(stream.tracks().iter().map(|t| t.kind()));
        Ok(())
    }

    async fn create_offer(&self) -> MediaResult<SessionDescription> {
        let state = lock(&self.state);
        if state.closed {
            return Err(Self::closed_error());
        }
        Ok(SessionDescription::offer(Self::build_sdp(&state.local_kinds)))
    }

    async fn create_answer(&self) -> MediaResult<SessionDescription> {
        let state = lock(&self.state);
        if state.signaling != Some(SignalingState::HaveRemoteOffer) {
            return Err(MediaError::Negotiation(
                "cannot create an answer without a remote offer".to_string(),
            ));
        }
        Ok(SessionDescription::answer(Self::build_sdp(&state.local_kinds)))
    }

    async fn set_local_description(&self, description: SessionDescription) -> MediaResult<()> {
        let kinds = {
            let mut state = lock(&self.state);
            let current = state.signaling.unwrap_or(SignalingState::Stable);
            let next = match (current, description.sdp_type) {
                (SignalingState::Stable, SdpType::Offer) => SignalingState::HaveLocalOffer,
                (SignalingState::HaveRemoteOffer, SdpType::Answer) => SignalingState::Stable,
                (current, sdp_type) => {
                    return Err(MediaError::Negotiation(format!(
                        "cannot set local {:?} in state {:?}",
                        sdp_type, current
                    )))
                }
            };
            state.signaling = Some(next);
            state.local = Some(description);
            self.try_connect(&mut state);
            state.local_kinds.clone()
        };

        self.gather(&kinds);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> MediaResult<()> {
        let mut state = lock(&self.state);
        let current = state.signaling.unwrap_or(SignalingState::Stable);
        let next = match (current, description.sdp_type) {
            (SignalingState::Stable, SdpType::Offer) => SignalingState::HaveRemoteOffer,
            (SignalingState::HaveLocalOffer, SdpType::Answer) => SignalingState::Stable,
            (current, sdp_type) => {
                return Err(MediaError::Negotiation(format!(
                    "cannot set remote {:?} in state {:?}",
                    sdp_type, current
                )))
            }
        };
        state.signaling = Some(next);
        state.remote = Some(description);

        self.emit(PeerEvent::ConnectionState(PeerConnectionState::Connecting));
        self.try_connect(&mut state);
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        lock(&self.state).remote.is_some()
    }

    fn signaling_state(&self) -> SignalingState {
        let state = lock(&self.state);
        if state.closed {
            SignalingState::Closed
        } else {
            state.signaling.unwrap_or(SignalingState::Stable)
        }
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> MediaResult<()> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(Self::closed_error());
        }
        if state.remote.is_none() {
            return Err(MediaError::Negotiation(
                "remote description is not set".to_string(),
            ));
        }

        debug!(candidate = %candidate.candidate, "Remote candidate added");
        state.remote_candidates += 1;
        self.try_connect(&mut state);
        Ok(())
    }

    async fn stats(&self) -> Option<TransportStats> {
        let link = *lock(&self.link);
        let mut state = lock(&self.state);
        if !state.connected || state.closed {
            return None;
        }

        state.packets += 100;
        let lost = (state.packets as f64 * link.loss).round() as u64;
        let received = state.packets.saturating_sub(lost);

        Some(TransportStats {
            packets_sent: state.packets,
            packets_received: received,
            packets_lost: lost,
            bytes_sent: state.packets * 160,
            bytes_received: received * 160,
            jitter_ms: link.jitter_ms,
            rtt_ms: link.rtt_ms,
            codec: Some("opus".to_string()),
        })
    }

    async fn close(&self) {
        let mut state = lock(&self.state);
        if state.closed {
            return;
        }
        state.closed = true;
        if let Some(stream) = state.remote_stream.take() {
            stream.stop_all();
        }
        self.emit(PeerEvent::ConnectionState(PeerConnectionState::Closed));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
