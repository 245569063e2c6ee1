//! # agora-core — Shared primitives for the Agora collaboration core
//!
//! Small, dependency-light types used by every Agora crate:
//!
//! - [`identity`] — participant identifiers and the prefix-equivalence
//!   predicate used for all signaling routing and session lookup
//! - [`version`] — authority-assigned document versions and their
//!   strict-ordering comparison

pub mod identity;
pub mod version;

// Re-exports for convenience
pub use identity::{same_participant, ParticipantId, ID_PREFIX};
pub use version::DocVersion;
