//! Consumed media capabilities: the peer connection and local capture.
//!
//! The engines behind these traits (the WebRTC stack, the microphone) live
//! outside this crate. The core only drives them: [`PeerLink`] is the
//! capability object for one peer-to-peer connection, [`MediaSource`] hands
//! out the shared local audio stream. Connection callbacks are modeled as
//! [`LinkEvent`] values the host delivers into the call manager, so every
//! callback becomes "deliver event E to session S" instead of free-form
//! code attached at construction time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the peer connection engine.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("candidate rejected: {0}")]
    Candidate(String),
    #[error("track error: {0}")]
    Track(String),
}

/// Errors from local media capture.
#[derive(Debug, Clone, Error)]
pub enum MediaError {
    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),
}

/// Only audio is modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
}

/// Handle to one media track owned by an external engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

/// Handle to a media stream: an id plus its tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<MediaTrack>,
}

/// An SDP session description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
}

/// A trickled ICE candidate, as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u32>,
}

/// Connection state reported by the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl LinkState {
    /// Terminal states trigger session teardown.
    pub fn is_terminal(self) -> bool {
        matches!(self, LinkState::Disconnected | LinkState::Failed | LinkState::Closed)
    }
}

/// An event originating from a link, delivered into the call manager.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The engine discovered a local candidate to trickle out.
    LocalCandidate(IceCandidate),
    /// A remote track became available on this connection.
    RemoteTrack(MediaTrack),
    /// The connection state changed.
    StateChanged(LinkState),
}

/// One peer-to-peer media connection.
///
/// Exclusively owned by a single session; never shared. `close` must be
/// safe to call more than once.
#[async_trait]
pub trait PeerLink: Send {
    async fn create_offer(&mut self) -> Result<SessionDescription, LinkError>;

    /// Create an answer for an already-set remote offer.
    async fn create_answer(&mut self) -> Result<SessionDescription, LinkError>;

    async fn set_local_description(
        &mut self,
        desc: &SessionDescription,
    ) -> Result<(), LinkError>;

    async fn set_remote_description(
        &mut self,
        desc: &SessionDescription,
    ) -> Result<(), LinkError>;

    async fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), LinkError>;

    /// Attach a local track (shared, not cloned) to this connection.
    fn attach_local_track(&mut self, track: &MediaTrack, stream_id: &str)
        -> Result<(), LinkError>;

    /// Stop sending all locally attached tracks. Infallible and idempotent.
    fn detach_local_tracks(&mut self);

    /// Tear the connection down. Infallible and idempotent.
    fn close(&mut self);
}

/// Factory for fresh links, one per session.
pub type LinkFactory =
    Box<dyn Fn(&agora_core::ParticipantId) -> Box<dyn PeerLink> + Send + Sync>;

/// Local capture hardware.
#[async_trait]
pub trait MediaSource: Send {
    /// Acquire the local audio stream. May fail; failure propagates to
    /// the caller that needed the stream.
    async fn acquire_audio(&mut self) -> Result<MediaStream, MediaError>;

    /// Release a previously acquired stream, stopping capture. Idempotent.
    fn release(&mut self, stream: &MediaStream);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(LinkState::Disconnected.is_terminal());
        assert!(LinkState::Failed.is_terminal());
        assert!(LinkState::Closed.is_terminal());
        assert!(!LinkState::New.is_terminal());
        assert!(!LinkState::Connecting.is_terminal());
        assert!(!LinkState::Connected.is_terminal());
    }

    #[test]
    fn test_candidate_wire_field_names() {
        let c = IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 192.0.2.1 54400 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        };
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains("\"sdpMid\":\"0\""));
        assert!(json.contains("\"sdpMLineIndex\":0"));
    }

    #[test]
    fn test_candidate_optional_fields_omitted() {
        let c = IceCandidate {
            candidate: "candidate:1".into(),
            sdp_mid: None,
            sdp_mline_index: None,
        };
        let json = serde_json::to_string(&c).unwrap();
        assert!(!json.contains("sdpMid"));
        assert!(!json.contains("sdpMLineIndex"));
    }
}
