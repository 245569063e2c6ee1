//! Document versions assigned by the authority.
//!
//! The client never invents or predicts a version; it only copies values
//! received from the authority. "Newer" is a strict integer comparison,
//! and an unknown version (before first sync) compares below any number.

use serde::{Deserialize, Serialize};

/// A version counter stamped by the document authority.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DocVersion(pub u64);

impl DocVersion {
    /// Whether `self` is strictly newer than the highest version observed
    /// so far. `None` means nothing has been observed yet and loses to
    /// any stamped version.
    pub fn supersedes(self, known: Option<DocVersion>) -> bool {
        match known {
            Some(k) => self > k,
            None => true,
        }
    }
}

impl std::fmt::Display for DocVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}
