//! Signaling envelope codec.
//!
//! Every message on the signaling channel is an `Envelope`: a JSON object
//! with a kebab-case `type` discriminator, optional `from`/`to` addressing,
//! and a type-specific `payload`. The channel is broadcast-style — an
//! envelope with no `to` field is for everyone, and one addressed to
//! somebody else is dropped by [`Envelope::addressed_to`] before it ever
//! reaches a state machine.
//!
//! Wire example:
//! ```text
//! {"type":"offer","from":"user-ab12","to":"cd34","payload":{"sdp":"v=0…"}}
//! ```

use agora_core::{DocVersion, ParticipantId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::media::{IceCandidate, SessionDescription};

/// Codec errors.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(String),
    #[error("signaling channel closed")]
    ChannelClosed,
}

/// A document update request: the client's current text against the
/// version it believes is canonical. `base_version` is absent before the
/// first snapshot arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocRequestPayload {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<DocVersion>,
}

/// Canonical text at a stamped version, carried by acceptances,
/// broadcasts, and snapshots alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocStatePayload {
    pub version: DocVersion,
    pub text: String,
}

/// Rejection of a stale update: the authority's current state, which the
/// client must adopt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocRejectedPayload {
    pub current_version: DocVersion,
    pub text: String,
}

/// The typed payload of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum Signal {
    /// SDP offer opening a call leg
    Offer(SessionDescription),
    /// SDP answer accepting a call leg
    Answer(SessionDescription),
    /// Trickled ICE candidate
    IceCandidate(IceCandidate),
    /// The callee refused; no connection was built
    CallDeclined,
    /// Client → authority: optimistic document update
    DocRequest(DocRequestPayload),
    /// Authority → client: the update was applied
    DocAccepted(DocStatePayload),
    /// Authority → client: the update was stale
    DocRejected(DocRejectedPayload),
    /// Authority broadcast of another participant's accepted edit
    DocUpdated(DocStatePayload),
    /// Initial document state on joining
    DocSnapshot(DocStatePayload),
}

impl Signal {
    /// Whether this signal belongs to the call subsystem.
    pub fn is_call(&self) -> bool {
        matches!(
            self,
            Signal::Offer(_) | Signal::Answer(_) | Signal::IceCandidate(_) | Signal::CallDeclined
        )
    }

    /// Whether this signal belongs to the document subsystem.
    pub fn is_document(&self) -> bool {
        !self.is_call()
    }

    /// The wire name of this signal, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Offer(_) => "offer",
            Signal::Answer(_) => "answer",
            Signal::IceCandidate(_) => "ice-candidate",
            Signal::CallDeclined => "call-declined",
            Signal::DocRequest(_) => "doc-request",
            Signal::DocAccepted(_) => "doc-accepted",
            Signal::DocRejected(_) => "doc-rejected",
            Signal::DocUpdated(_) => "doc-updated",
            Signal::DocSnapshot(_) => "doc-snapshot",
        }
    }
}

/// One signaling message: addressing plus a typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<ParticipantId>,
    #[serde(flatten)]
    pub signal: Signal,
}

impl Envelope {
    /// Create an addressed offer.
    pub fn offer(from: ParticipantId, to: ParticipantId, sdp: SessionDescription) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            signal: Signal::Offer(sdp),
        }
    }

    /// Create an addressed answer.
    pub fn answer(from: ParticipantId, to: ParticipantId, sdp: SessionDescription) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            signal: Signal::Answer(sdp),
        }
    }

    /// Create an addressed trickled candidate.
    pub fn ice_candidate(
        from: ParticipantId,
        to: ParticipantId,
        candidate: IceCandidate,
    ) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            signal: Signal::IceCandidate(candidate),
        }
    }

    /// Create an addressed decline.
    pub fn call_declined(from: ParticipantId, to: ParticipantId) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            signal: Signal::CallDeclined,
        }
    }

    /// Create a document update request for the authority.
    pub fn doc_request(
        from: ParticipantId,
        text: impl Into<String>,
        base_version: Option<DocVersion>,
    ) -> Self {
        Self {
            from: Some(from),
            to: None,
            signal: Signal::DocRequest(DocRequestPayload {
                text: text.into(),
                base_version,
            }),
        }
    }

    /// Serialize to the JSON wire format.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Deserialize from the JSON wire format.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Whether this envelope is for `local`: either broadcast (no `to`)
    /// or addressed to an equivalent identifier.
    pub fn addressed_to(&self, local: &ParticipantId) -> bool {
        match &self.to {
            Some(to) => to.matches(local),
            None => true,
        }
    }
}
