//! Shared-document synchronization against the external authority.
//!
//! The client keeps an optimistic local mirror of the text and reconciles
//! it against authority verdicts:
//!
//! ```text
//! UI edit ──► submit_edit (optimistic, re-arms debounce)
//!                  │  quiet window elapses
//!                  ▼
//!            doc-request { text, baseVersion } ──► authority
//!                  │
//!     ┌────────────┼───────────────┐
//!     ▼            ▼               ▼
//! doc-accepted  doc-rejected   doc-updated (foreign)
//! adopt if      adopt always   adopt if newer
//! no newer edit (authority wins)
//! ```
//!
//! Versions are stamped solely by the authority and only ever move
//! forward here; anything carrying a version at or below what we have
//! already seen is a stale duplicate and is dropped.
//!
//! While one request awaits its verdict no second request is
//! transmitted: a superseding edit is held (newest text wins) and goes
//! out the moment the in-flight request resolves, so we never send a
//! `baseVersion` the pending response is about to invalidate.

use std::time::Duration;

use agora_core::{DocVersion, ParticipantId};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::protocol::{Envelope, ProtocolError, Signal};

/// Quiet window after the last local edit before an update goes out.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(300);

/// Events for the editor host.
#[derive(Debug, Clone, PartialEq)]
pub enum DocEvent {
    /// The mirror adopted new text (snapshot, acceptance, rejection, or
    /// a foreign broadcast); the editor should re-render.
    DocumentChanged(String),
}

/// Client-side mirror of the shared document.
pub struct DocumentSyncClient {
    local_id: ParticipantId,
    /// Highest version observed from the authority; `None` before the
    /// first sync. Non-decreasing for the life of the session.
    known_version: Option<DocVersion>,
    local_text: String,
    /// Text of the most recent transmitted update, used to suppress
    /// redundant retransmission.
    last_sent_text: Option<String>,
    /// When the debounce window elapses, if an edit is pending.
    deadline: Option<Instant>,
    /// An update request has been transmitted and not yet answered.
    in_flight: bool,
    debounce_window: Duration,
    outgoing_tx: mpsc::Sender<Envelope>,
    event_tx: mpsc::Sender<DocEvent>,
    event_rx: Option<mpsc::Receiver<DocEvent>>,
}

impl DocumentSyncClient {
    pub fn new(local_id: ParticipantId, outgoing_tx: mpsc::Sender<Envelope>) -> Self {
        Self::with_debounce_window(local_id, outgoing_tx, DEBOUNCE_WINDOW)
    }

    pub fn with_debounce_window(
        local_id: ParticipantId,
        outgoing_tx: mpsc::Sender<Envelope>,
        debounce_window: Duration,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            local_id,
            known_version: None,
            local_text: String::new(),
            last_sent_text: None,
            deadline: None,
            in_flight: false,
            debounce_window,
            outgoing_tx,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<DocEvent>> {
        self.event_rx.take()
    }

    pub fn known_version(&self) -> Option<DocVersion> {
        self.known_version
    }

    pub fn local_text(&self) -> &str {
        &self.local_text
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// When the host should next call [`flush_due`](Self::flush_due), if
    /// an edit is waiting out its quiet window.
    pub fn flush_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Record a local edit. The mirror updates immediately (optimistic)
    /// and the quiet-window timer restarts.
    pub fn submit_edit(&mut self, text: impl Into<String>) {
        self.local_text = text.into();
        self.deadline = Some(Instant::now() + self.debounce_window);
    }

    /// Fire the debounce timer if its deadline has passed. Transmits at
    /// most one update request; returns whether one went out.
    pub async fn flush_due(&mut self, now: Instant) -> Result<bool, ProtocolError> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                self.maybe_send().await
            }
            _ => Ok(false),
        }
    }

    /// Deliver one signaling envelope. Non-document signals and stale
    /// versions are dropped silently.
    pub async fn handle_envelope(&mut self, env: Envelope) {
        if !env.addressed_to(&self.local_id) {
            return;
        }
        match env.signal {
            Signal::DocSnapshot(state) => {
                // The first seed wins unconditionally over placeholder
                // text. The channel may redeliver; once seeded, a
                // snapshot obeys the same staleness rule as any other
                // authority message.
                if self.known_version.is_some() && !state.version.supersedes(self.known_version) {
                    log::debug!("stale snapshot at {} dropped", state.version);
                    return;
                }
                log::info!("document seeded at {}", state.version);
                self.known_version = Some(state.version);
                self.adopt_text(state.text).await;
                self.last_sent_text = Some(self.local_text.clone());
                self.deadline = None;
                self.in_flight = false;
            }
            Signal::DocAccepted(state) => {
                if !state.version.supersedes(self.known_version) {
                    log::debug!("stale acceptance at {} dropped", state.version);
                    return;
                }
                self.known_version = Some(state.version);
                let ours = self.last_sent_text.as_deref() == Some(state.text.as_str());
                let newer_edit_pending = self.last_sent_text.as_deref()
                    != Some(self.local_text.as_str());
                if !newer_edit_pending {
                    // No newer unsent edit; the acceptance is the truth.
                    self.adopt_text(state.text).await;
                    self.last_sent_text = Some(self.local_text.clone());
                }
                // Otherwise the pending edit's own flush re-synchronizes.
                if ours {
                    self.resolve_in_flight().await;
                }
            }
            Signal::DocRejected(rejection) => {
                // Our base version was stale: the authority's state wins,
                // discarding the locally pending edit.
                log::debug!(
                    "update rejected, adopting authority state at {}",
                    rejection.current_version
                );
                let newer = self
                    .known_version
                    .map_or(true, |k| rejection.current_version >= k);
                if newer {
                    self.known_version = Some(rejection.current_version);
                    self.adopt_text(rejection.text).await;
                    self.last_sent_text = Some(self.local_text.clone());
                    self.deadline = None;
                }
                self.resolve_in_flight().await;
            }
            Signal::DocUpdated(state) => {
                if !state.version.supersedes(self.known_version) {
                    log::debug!("stale broadcast at {} dropped", state.version);
                    return;
                }
                self.known_version = Some(state.version);
                self.adopt_text(state.text).await;
                // The broadcast is canonical; nothing local remains to send.
                self.last_sent_text = Some(self.local_text.clone());
                self.deadline = None;
            }
            other => {
                log::debug!("non-document signal {} ignored by sync client", other.kind());
            }
        }
    }

    /// Transmit the pending edit unless it is redundant or a request is
    /// already awaiting its verdict.
    async fn maybe_send(&mut self) -> Result<bool, ProtocolError> {
        if self.in_flight {
            // Held; resolve_in_flight() sends the superseding edit.
            return Ok(false);
        }
        if self.last_sent_text.as_deref() == Some(self.local_text.as_str()) {
            return Ok(false);
        }
        let env = Envelope::doc_request(
            self.local_id.clone(),
            self.local_text.clone(),
            self.known_version,
        );
        self.outgoing_tx
            .send(env)
            .await
            .map_err(|_| ProtocolError::ChannelClosed)?;
        self.last_sent_text = Some(self.local_text.clone());
        self.in_flight = true;
        Ok(true)
    }

    /// The in-flight request resolved; release any held superseding edit
    /// immediately.
    async fn resolve_in_flight(&mut self) {
        self.in_flight = false;
        if self.last_sent_text.as_deref() != Some(self.local_text.as_str()) {
            self.deadline = None;
            if let Err(e) = self.maybe_send().await {
                log::warn!("superseding update not sent: {e}");
            }
        }
    }

    async fn adopt_text(&mut self, text: String) {
        self.local_text = text;
        let _ = self
            .event_tx
            .send(DocEvent::DocumentChanged(self.local_text.clone()))
            .await;
    }
}
