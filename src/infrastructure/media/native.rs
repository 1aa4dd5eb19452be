//! Native WebRTC media engine built on the `webrtc` crate
//!
//! Local tracks are sample-fed tracks the embedding application writes
//! encoded frames into; device capture itself is outside this crate.

use crate::domain::media::{
    IceCandidateInit, IceServer, MediaConstraints, MediaEngine, MediaError, MediaResult,
    MediaStream, MediaTrack, PeerConnection, PeerConnectionState, PeerEvent, PeerEventSender,
    SdpType, SessionDescription, SignalingState, TrackKind, TrackReadyState, TransportStats,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine as RtcMediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

fn negotiation(e: impl fmt::Display) -> MediaError {
    MediaError::Negotiation(e.to_string())
}

/// RTP tracks behind the live local tracks, by track id
type RtpTrackMap = Mutex<HashMap<String, Arc<TrackLocalStaticSample>>>;

fn lock_tracks(map: &RtpTrackMap) -> MutexGuard<'_, HashMap<String, Arc<TrackLocalStaticSample>>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Local track backed by a sample-fed RTP track
pub struct NativeLocalTrack {
    id: String,
    kind: TrackKind,
    ended: AtomicBool,
    enabled: AtomicBool,
    rtp_tracks: Weak<RtpTrackMap>,
}

impl fmt::Debug for NativeLocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("ended", &self.ended)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl MediaTrack for NativeLocalTrack {
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
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        // The RTP track goes with the local track
        if let Some(rtp_tracks) = self.rtp_tracks.upgrade() {
            lock_tracks(&rtp_tracks).remove(&self.id);
        }
    }
}

/// Track received from the remote peer
#[derive(Debug)]
pub struct NativeRemoteTrack {
    id: String,
    kind: TrackKind,
    ended: AtomicBool,
    enabled: AtomicBool,
}

impl NativeRemoteTrack {
    fn from_remote(track: &TrackRemote) -> Self {
        let kind = match track.kind() {
            RTPCodecType::Video => TrackKind::Video,
            _ => TrackKind::Audio,
        };
        Self {
            id: track.id(),
            kind,
            ended: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
        }
    }
}

impl MediaTrack for NativeRemoteTrack {
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

/// Media engine speaking real ICE/DTLS/SRTP
pub struct NativeMediaEngine {
    api: Arc<API>,
    rtp_tracks: Arc<RtpTrackMap>,
}

impl NativeMediaEngine {
    pub fn new() -> MediaResult<Self> {
        let mut media_engine = RtcMediaEngine::default();
        media_engine.register_default_codecs().map_err(negotiation)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(negotiation)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api: Arc::new(api),
            rtp_tracks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// RTP track to write encoded samples into, while the local track is live
    pub fn sample_track(&self, track_id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        lock_tracks(&self.rtp_tracks).get(track_id).cloned()
    }

    fn rtc_ice_servers(ice_servers: &[IceServer]) -> Vec<RTCIceServer> {
        ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect()
    }
}

#[async_trait]
impl MediaEngine for NativeMediaEngine {
    async fn get_local_stream(&self, constraints: MediaConstraints) -> MediaResult<MediaStream> {
        if !constraints.audio && !constraints.video {
            return Err(MediaError::ConstraintsUnsatisfiable);
        }

        let stream_id = Uuid::new_v4().to_string();
        let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();
        let mut rtp_tracks = lock_tracks(&self.rtp_tracks);

        for (wanted, kind, mime_type) in [
            (constraints.audio, TrackKind::Audio, MIME_TYPE_OPUS),
            (constraints.video, TrackKind::Video, MIME_TYPE_VP8),
        ] {
            if !wanted {
                continue;
            }
            let id = Uuid::new_v4().to_string();
            let rtp = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: mime_type.to_owned(),
                    ..Default::default()
                },
                id.clone(),
                stream_id.clone(),
            ));
            rtp_tracks.insert(id.clone(), rtp);
            tracks.push(Arc::new(NativeLocalTrack {
                id,
                kind,
                ended: AtomicBool::new(false),
                enabled: AtomicBool::new(true),
                rtp_tracks: Arc::downgrade(&self.rtp_tracks),
            }));
        }

        Ok(MediaStream::new(stream_id, tracks))
    }

    async fn create_peer_connection(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventSender,
    ) -> MediaResult<Arc<dyn PeerConnection>> {
        let config = RTCConfiguration {
            ice_servers: Self::rtc_ice_servers(ice_servers),
            ..Default::default()
        };

        let pc = Arc::new(self.api.new_peer_connection(config).await.map_err(negotiation)?);
        register_handlers(&pc, events);

        info!(ice_servers = ice_servers.len(), "Native peer connection created");
        Ok(Arc::new(NativePeerConnection {
            pc,
            rtp_tracks: self.rtp_tracks.clone(),
        }))
    }
}

/// Forward peer connection callbacks into the session's event channel
fn register_handlers(pc: &Arc<RTCPeerConnection>, events: PeerEventSender) {
    let tx = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        if let Some(candidate) = candidate {
            match candidate.to_json() {
                Ok(init) => {
                    let _ = tx.send(PeerEvent::IceCandidate(IceCandidateInit {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                    }));
                }
                Err(e) => warn!("Failed to serialize local candidate: {}", e),
            }
        }
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        debug!("Peer connection state: {:?}", s);
        let state = match s {
            RTCPeerConnectionState::New => Some(PeerConnectionState::New),
            RTCPeerConnectionState::Connecting => Some(PeerConnectionState::Connecting),
            RTCPeerConnectionState::Connected => Some(PeerConnectionState::Connected),
            RTCPeerConnectionState::Disconnected => Some(PeerConnectionState::Disconnected),
            RTCPeerConnectionState::Failed => Some(PeerConnectionState::Failed),
            RTCPeerConnectionState::Closed => Some(PeerConnectionState::Closed),
            _ => None,
        };
        if let Some(state) = state {
            let _ = tx.send(PeerEvent::ConnectionState(state));
        }
        Box::pin(async {})
    }));

    let tx = events;
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let remote: Arc<dyn MediaTrack> = Arc::new(NativeRemoteTrack::from_remote(&track));
        let _ = tx.send(PeerEvent::Track(MediaStream::new(
            track.stream_id(),
            vec![remote],
        )));
        Box::pin(async {})
    }));
}

/// `RTCPeerConnection` behind the domain port
pub struct NativePeerConnection {
    pc: Arc<RTCPeerConnection>,
    rtp_tracks: Arc<RtpTrackMap>,
}

impl NativePeerConnection {
    fn to_rtc(description: SessionDescription) -> MediaResult<RTCSessionDescription> {
        match description.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(description.sdp).map_err(negotiation),
            SdpType::Answer => RTCSessionDescription::answer(description.sdp).map_err(negotiation),
        }
    }

    fn from_rtc(description: RTCSessionDescription) -> MediaResult<SessionDescription> {
        match description.sdp_type {
            RTCSdpType::Offer => Ok(SessionDescription::offer(description.sdp)),
            RTCSdpType::Answer => Ok(SessionDescription::answer(description.sdp)),
            other => Err(MediaError::Negotiation(format!(
                "unsupported description type {:?}",
                other
            ))),
        }
    }
}

#[async_trait]
impl PeerConnection for NativePeerConnection {
    async fn add_stream(&self, stream: &MediaStream) -> MediaResult<()> {
        let rtp = {
            let rtp_tracks = lock_tracks(&self.rtp_tracks);
            stream
                .tracks()
                .iter()
                .map(|track| {
                    rtp_tracks.get(track.id()).cloned().ok_or_else(|| {
                        MediaError::Negotiation(format!(
                            "track {} is not a live track of this engine",
                            track.id()
                        ))
                    })
                })
                .collect::<MediaResult<Vec<_>>>()?
        };

        for track in rtp {
            self.pc
                .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(negotiation)?;
        }
        Ok(())
    }

    async fn create_offer(&self) -> MediaResult<SessionDescription> {
        let offer = self.pc.create_offer(None).await.map_err(negotiation)?;
        Self::from_rtc(offer)
    }

    async fn create_answer(&self) -> MediaResult<SessionDescription> {
        let answer = self.pc.create_answer(None).await.map_err(negotiation)?;
        Self::from_rtc(answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> MediaResult<()> {
        self.pc
            .set_local_description(Self::to_rtc(description)?)
            .await
            .map_err(negotiation)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> MediaResult<()> {
        self.pc
            .set_remote_description(Self::to_rtc(description)?)
            .await
            .map_err(negotiation)
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    fn signaling_state(&self) -> SignalingState {
        match self.pc.signaling_state() {
            RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
            RTCSignalingState::Closed => SignalingState::Closed,
            _ => SignalingState::Stable,
        }
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> MediaResult<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await
            .map_err(negotiation)
    }

    async fn stats(&self) -> Option<TransportStats> {
        let report = self.pc.get_stats().await;
        report.reports.values().find_map(|entry| match entry {
            StatsReportType::CandidatePair(pair) if pair.nominated => Some(TransportStats {
                packets_sent: pair.packets_sent as u64,
                packets_received: pair.packets_received as u64,
                packets_lost: 0,
                bytes_sent: pair.bytes_sent as u64,
                bytes_received: pair.bytes_received as u64,
                jitter_ms: 0.0,
                rtt_ms: pair.current_round_trip_time * 1000.0,
                codec: None,
            }),
            _ => None,
        })
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!("Failed to close peer connection: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_stream_tracks_are_registered() {
        let engine = NativeMediaEngine::new().unwrap();
        let stream = engine
            .get_local_stream(MediaConstraints::audio_video())
            .await
            .unwrap();

        assert_eq!(stream.tracks().len(), 2);
        for track in stream.tracks() {
            assert!(engine.sample_track(track.id()).is_some());
        }
    }

    #[tokio::test]
    async fn test_stopped_tracks_release_rtp_tracks() {
        let engine = NativeMediaEngine::new().unwrap();
        let first = engine
            .get_local_stream(MediaConstraints::audio_video())
            .await
            .unwrap();
        let second = engine
            .get_local_stream(MediaConstraints::audio_only())
            .await
            .unwrap();

        first.stop_all();
        first.stop_all();
        for track in first.tracks() {
            assert!(engine.sample_track(track.id()).is_none());
        }
        assert!(engine.sample_track(second.tracks()[0].id()).is_some());
        assert_eq!(lock_tracks(&engine.rtp_tracks).len(), 1);

        // A stopped stream cannot be negotiated again
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let pc = engine.create_peer_connection(&[], tx).await.unwrap();
        assert!(pc.add_stream(&first).await.is_err());
        pc.close().await;
    }

    #[tokio::test]
    async fn test_offer_has_audio_section() {
        let engine = NativeMediaEngine::new().unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let pc = engine.create_peer_connection(&[], tx).await.unwrap();

        let stream = engine
            .get_local_stream(MediaConstraints::audio_only())
            .await
            .unwrap();
        pc.add_stream(&stream).await.unwrap();

        let offer = pc.create_offer().await.unwrap();
        assert!(offer.sdp.contains("m=audio"));
        pc.close().await;
    }
}
