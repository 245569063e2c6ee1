//! Participant identity and the id-equivalence predicate.
//!
//! Identifiers reach the core from two origins: locally generated session
//! ids (prefixed `user-<uuid>`) and raw user ids handed out by the room
//! directory. Both name the same participant, so every routing and
//! session-lookup decision goes through [`same_participant`] instead of
//! literal string equality. Keeping the predicate in one place means a
//! canonical-id scheme can replace the prefix heuristic without touching
//! any call site.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marker prepended to locally generated participant ids.
pub const ID_PREFIX: &str = "user-";

/// Stable identifier of one participant in a room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh prefixed id for the local client.
    pub fn generate() -> Self {
        Self(format!("{ID_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id with any local prefix stripped.
    ///
    /// Used as the canonical map key so that the prefixed and raw forms
    /// of the same participant land in the same session slot.
    pub fn canonical(&self) -> &str {
        self.0.strip_prefix(ID_PREFIX).unwrap_or(&self.0)
    }

    /// Whether this id names the same participant as `other`.
    pub fn matches(&self, other: &ParticipantId) -> bool {
        same_participant(self.as_str(), other.as_str())
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Two identifiers name the same participant when they are literally
/// equal, or when one is the other with [`ID_PREFIX`] prepended.
pub fn same_participant(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    a.strip_prefix(ID_PREFIX).is_some_and(|raw| raw == b)
        || b.strip_prefix(ID_PREFIX).is_some_and(|raw| raw == a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_equality() {
        assert!(same_participant("abc", "abc"));
        assert!(same_participant("user-abc", "user-abc"));
    }

    #[test]
    fn test_prefix_equivalence_both_directions() {
        assert!(same_participant("user-abc", "abc"));
        assert!(same_participant("abc", "user-abc"));
    }

    #[test]
    fn test_distinct_participants() {
        assert!(!same_participant("abc", "def"));
        assert!(!same_participant("user-abc", "def"));
        assert!(!same_participant("user-abc", "user-def"));
    }

    #[test]
    fn test_double_prefix_is_not_equivalent() {
        // "user-user-abc" strips to "user-abc", which is not "abc".
        assert!(!same_participant("user-user-abc", "abc"));
        assert!(same_participant("user-user-abc", "user-abc"));
    }

    #[test]
    fn test_canonical_strips_prefix() {
        assert_eq!(ParticipantId::new("user-abc").canonical(), "abc");
        assert_eq!(ParticipantId::new("abc").canonical(), "abc");
    }

    #[test]
    fn test_generate_is_prefixed_and_unique() {
        let a = ParticipantId::generate();
        let b = ParticipantId::generate();
        assert!(a.as_str().starts_with(ID_PREFIX));
        assert_ne!(a, b);
    }

    #[test]
    fn test_matches_method() {
        let session = ParticipantId::new("user-abc");
        let raw = ParticipantId::new("abc");
        assert!(session.matches(&raw));
        assert!(raw.matches(&session));
    }

    #[test]
    fn test_serde_transparent() {
        let id = ParticipantId::new("abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc\"");
        let back: ParticipantId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
