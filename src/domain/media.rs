//! Media engine port
//!
//! Local capture and the peer-to-peer transport are provided by the platform.
//! Peer connection callbacks are delivered as typed [`PeerEvent`]s into a
//! channel owned by the call session, so every state change happens in one
//! place.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Media result type
pub type MediaResult<T> = std::result::Result<T, MediaError>;

/// Closed taxonomy of media failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Permission to use the microphone or camera was denied")]
    PermissionDenied,

    #[error("No microphone or camera was found")]
    DeviceNotFound,

    #[error("The microphone or camera is in use by another application")]
    DeviceBusy,

    #[error("The requested media constraints cannot be satisfied")]
    ConstraintsUnsatisfiable,

    #[error("Peer connection error: {0}")]
    Negotiation(String),

    #[error("Unknown media error: {0}")]
    Unknown(String),
}

impl MediaError {
    /// Stable code for UI consumption
    pub fn code(&self) -> &'static str {
        match self {
            MediaError::PermissionDenied => "permission-denied",
            MediaError::DeviceNotFound => "device-not-found",
            MediaError::DeviceBusy => "device-busy",
            MediaError::ConstraintsUnsatisfiable => "constraints-unsatisfiable",
            MediaError::Negotiation(_) => "negotiation-failed",
            MediaError::Unknown(_) => "unknown",
        }
    }

    /// Failures raised while acquiring local devices
    pub fn is_acquisition_error(&self) -> bool {
        !matches!(self, MediaError::Negotiation(_))
    }
}

/// What to capture locally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }

    pub fn audio_video() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackReadyState {
    Live,
    Ended,
}

/// One captured or received media track
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    fn ready_state(&self) -> TrackReadyState;
    fn enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    /// Release the underlying device; idempotent
    fn stop(&self);
}

/// Group of tracks delivered together
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(|t| t.ready_state() == TrackReadyState::Live)
    }

    /// Stop every track, releasing camera and microphone
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// ICE server entry handed to the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: None,
            credential: None,
        }
    }
}

/// Serializable ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Offer/answer negotiation state of a peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Transport statistics sampled from a connected peer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub jitter_ms: f64,
    pub rtt_ms: f64,
    pub codec: Option<String>,
}

/// Everything a peer connection reports asynchronously
#[derive(Debug, Clone)]
pub enum PeerEvent {
    IceCandidate(IceCandidateInit),
    Track(MediaStream),
    ConnectionState(PeerConnectionState),
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;
pub type PeerEventReceiver = mpsc::UnboundedReceiver<PeerEvent>;

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_stream(&self, stream: &MediaStream) -> MediaResult<()>;
    async fn create_offer(&self) -> MediaResult<SessionDescription>;
    async fn create_answer(&self) -> MediaResult<SessionDescription>;
    async fn set_local_description(&self, description: SessionDescription) -> MediaResult<()>;
    async fn set_remote_description(&self, description: SessionDescription) -> MediaResult<()>;
    async fn has_remote_description(&self) -> bool;
    fn signaling_state(&self) -> SignalingState;
    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> MediaResult<()>;
    /// `None` until the transport has something to report
    async fn stats(&self) -> Option<TransportStats>;
    /// Close the transport; idempotent
    async fn close(&self);
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Acquire local capture; on failure nothing stays acquired
    async fn get_local_stream(&self, constraints: MediaConstraints) -> MediaResult<MediaStream>;

    async fn create_peer_connection(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventSender,
    ) -> MediaResult<Arc<dyn PeerConnection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(MediaError::PermissionDenied.code(), "permission-denied");
        assert_eq!(MediaError::DeviceNotFound.code(), "device-not-found");
        assert_eq!(MediaError::DeviceBusy.code(), "device-busy");
        assert_eq!(MediaError::ConstraintsUnsatisfiable.code(), "constraints-unsatisfiable");
        assert!(!MediaError::Negotiation("x".into()).is_acquisition_error());
    }

    #[test]
    fn test_candidate_wire_names() {
        let candidate = IceCandidateInit {
            candidate: "candidate:1".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };
        let value = serde_json::to_value(&candidate).unwrap();
        assert_eq!(value["sdpMid"], "0");
        assert_eq!(value["sdpMLineIndex"], 0);
    }
}
