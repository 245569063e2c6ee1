//! # agora-collab — Peer collaboration core for Agora
//!
//! Orchestrates one-to-many audio calls over a signaling channel and
//! keeps a shared text document consistent against an external authority
//! using version-stamped optimistic concurrency.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  Envelope (JSON)  ┌──────────────────┐
//! │ Signaling  │ ◄───────────────► │    RoomClient    │
//! │ channel    │                   │ ┌──────────────┐ │
//! │ (external) │                   │ │ CallManager  │─┼─► PeerLink (external)
//! └────────────┘                   │ ├──────────────┤ │
//!                                  │ │ DocumentSync │─┼─► EditorHost events
//!                                  │ │ Client       │ │
//!                                  │ └──────────────┘ │
//!                                  └──────────────────┘
//! ```
//!
//! The transport moving envelopes, the peer-connection engine behind
//! [`PeerLink`](media::PeerLink), and the document authority all live
//! outside this crate; the core consumes them through traits and mpsc
//! channels and owns only the protocol state machines.
//!
//! ## Modules
//!
//! - [`protocol`] — JSON envelope codec and signal kinds
//! - [`media`] — consumed capabilities: peer links and local capture
//! - [`call`] — `CallManager` / `PeerSession` call state machine
//! - [`doc`] — `DocumentSyncClient` with debounced optimistic edits
//! - [`room`] — one-room facade routing a single signaling feed

pub mod call;
pub mod doc;
pub mod media;
pub mod protocol;
pub mod room;

// Re-exports for convenience
pub use call::{CallError, CallEvent, CallManager, CallOutcome, PeerSession, SessionState};
pub use doc::{DocEvent, DocumentSyncClient, DEBOUNCE_WINDOW};
pub use media::{
    IceCandidate, LinkError, LinkEvent, LinkFactory, LinkState, MediaError, MediaSource,
    MediaStream, MediaTrack, PeerLink, SessionDescription, TrackKind,
};
pub use protocol::{
    DocRejectedPayload, DocRequestPayload, DocStatePayload, Envelope, ProtocolError, Signal,
};
pub use room::RoomClient;
