//! One room membership: a single signaling feed routed into both
//! subsystems.
//!
//! The host owns one connection to the signaling channel per room and
//! hands every decoded envelope to [`RoomClient::handle_envelope`], which
//! dispatches call signals to the [`CallManager`] and document signals to
//! the [`DocumentSyncClient`]. Both share the room's outgoing envelope
//! channel.

use agora_core::ParticipantId;
use tokio::sync::mpsc;

use crate::call::CallManager;
use crate::doc::DocumentSyncClient;
use crate::media::{LinkFactory, MediaSource};
use crate::protocol::Envelope;

/// The peer collaboration core for one room.
pub struct RoomClient {
    calls: CallManager,
    doc: DocumentSyncClient,
}

impl RoomClient {
    pub fn new(
        local_id: ParticipantId,
        media: Box<dyn MediaSource>,
        link_factory: LinkFactory,
        outgoing_tx: mpsc::Sender<Envelope>,
    ) -> Self {
        Self {
            calls: CallManager::new(
                local_id.clone(),
                media,
                link_factory,
                outgoing_tx.clone(),
            ),
            doc: DocumentSyncClient::new(local_id, outgoing_tx),
        }
    }

    /// Deliver one envelope from the signaling channel to the subsystem
    /// that owns its signal kind.
    pub async fn handle_envelope(&mut self, env: Envelope) {
        if env.signal.is_call() {
            self.calls.handle_envelope(env).await;
        } else {
            self.doc.handle_envelope(env).await;
        }
    }

    pub fn calls(&self) -> &CallManager {
        &self.calls
    }

    pub fn calls_mut(&mut self) -> &mut CallManager {
        &mut self.calls
    }

    pub fn doc(&self) -> &DocumentSyncClient {
        &self.doc
    }

    pub fn doc_mut(&mut self) -> &mut DocumentSyncClient {
        &mut self.doc
    }

    /// Leave the room: hang up every call and release capture. The
    /// document mirror keeps its last state for the host to dispose of.
    pub async fn leave(&mut self) {
        self.calls.hangup().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaError, MediaStream, PeerLink};
    use crate::protocol::{DocStatePayload, Signal};
    use agora_core::DocVersion;

    struct NoMedia;

    #[async_trait::async_trait]
    impl MediaSource for NoMedia {
        async fn acquire_audio(&mut self) -> Result<MediaStream, MediaError> {
            Err(MediaError::CaptureUnavailable("test".into()))
        }
        fn release(&mut self, _stream: &MediaStream) {}
    }

    fn no_links() -> LinkFactory {
        Box::new(|_peer: &ParticipantId| -> Box<dyn PeerLink> {
            unreachable!("no link should be created")
        })
    }

    #[tokio::test]
    async fn test_routes_doc_signals_to_sync_client() {
        let (tx, _rx) = mpsc::channel(8);
        let mut room = RoomClient::new("user-local".into(), Box::new(NoMedia), no_links(), tx);

        room.handle_envelope(Envelope {
            from: None,
            to: None,
            signal: Signal::DocSnapshot(DocStatePayload {
                version: DocVersion(1),
                text: "hello".into(),
            }),
        })
        .await;

        assert_eq!(room.doc().local_text(), "hello");
        assert_eq!(room.calls().session_count(), 0);
    }

    #[tokio::test]
    async fn test_routes_call_signals_to_manager() {
        let (tx, _rx) = mpsc::channel(8);
        let mut room = RoomClient::new("user-local".into(), Box::new(NoMedia), no_links(), tx);

        room.handle_envelope(Envelope::offer(
            "caller".into(),
            "user-local".into(),
            crate::media::SessionDescription { sdp: "v=0".into() },
        ))
        .await;

        assert_eq!(room.calls().incoming_calls().len(), 1);
        assert_eq!(room.doc().known_version(), None);
    }
}
