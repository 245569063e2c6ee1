//! Document synchronization against a scripted authority.
//!
//! A minimal in-test authority applies the real accept/reject rule
//! (update applies only when its base version equals the canonical
//! version) and drives two sync clients to convergence.

use std::time::Duration;

use agora_collab::{DocumentSyncClient, Envelope, Signal};
use agora_core::{DocVersion, ParticipantId};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// The canonical document: applies requests, answers the sender, and
/// broadcasts accepted edits.
struct Authority {
    version: u64,
    text: String,
}

impl Authority {
    fn new(text: &str) -> Self {
        Self { version: 1, text: text.into() }
    }

    fn snapshot(&self) -> Envelope {
        Envelope {
            from: None,
            to: None,
            signal: Signal::DocSnapshot(agora_collab::DocStatePayload {
                version: DocVersion(self.version),
                text: self.text.clone(),
            }),
        }
    }

    /// Returns (reply to sender, optional broadcast to everyone else).
    fn handle(&mut self, env: Envelope) -> (Envelope, Option<Envelope>) {
        let from = env.from.clone().expect("requests carry a sender");
        let Signal::DocRequest(req) = env.signal else {
            panic!("authority only handles doc-request");
        };
        if req.base_version == Some(DocVersion(self.version)) {
            self.version += 1;
            self.text = req.text;
            let accepted = Envelope {
                from: None,
                to: Some(from),
                signal: Signal::DocAccepted(agora_collab::DocStatePayload {
                    version: DocVersion(self.version),
                    text: self.text.clone(),
                }),
            };
            let broadcast = Envelope {
                from: None,
                to: None,
                signal: Signal::DocUpdated(agora_collab::DocStatePayload {
                    version: DocVersion(self.version),
                    text: self.text.clone(),
                }),
            };
            (accepted, Some(broadcast))
        } else {
            let rejected = Envelope {
                from: None,
                to: Some(from),
                signal: Signal::DocRejected(agora_collab::DocRejectedPayload {
                    current_version: DocVersion(self.version),
                    text: self.text.clone(),
                }),
            };
            (rejected, None)
        }
    }
}

fn sync_client(name: &str) -> (DocumentSyncClient, mpsc::Receiver<Envelope>) {
    let (tx, rx) = mpsc::channel(64);
    (
        DocumentSyncClient::new(ParticipantId::new(format!("user-{name}")), tx),
        rx,
    )
}

async fn flush_now(client: &mut DocumentSyncClient) -> bool {
    client
        .flush_due(Instant::now() + Duration::from_secs(60))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_edit_accepted_and_broadcast_converges_both_clients() {
    let mut authority = Authority::new("start");
    let (mut alice, mut alice_out) = sync_client("alice");
    let (mut bob, _bob_out) = sync_client("bob");

    alice.handle_envelope(authority.snapshot()).await;
    bob.handle_envelope(authority.snapshot()).await;

    alice.submit_edit("start, edited");
    assert!(flush_now(&mut alice).await);

    let request = alice_out.try_recv().unwrap();
    let (reply, broadcast) = authority.handle(request);
    let broadcast = broadcast.expect("accepted edits broadcast");

    alice.handle_envelope(reply).await;
    // Alice also hears the broadcast of her own edit; it is stale for her.
    alice.handle_envelope(broadcast.clone()).await;
    bob.handle_envelope(broadcast).await;

    assert_eq!(alice.known_version(), Some(DocVersion(2)));
    assert_eq!(bob.known_version(), Some(DocVersion(2)));
    assert_eq!(alice.local_text(), "start, edited");
    assert_eq!(bob.local_text(), "start, edited");
    assert!(!alice.is_in_flight());
}

#[tokio::test]
async fn test_conflicting_edits_authority_wins() {
    let mut authority = Authority::new("base");
    let (mut alice, mut alice_out) = sync_client("alice");
    let (mut bob, mut bob_out) = sync_client("bob");

    alice.handle_envelope(authority.snapshot()).await;
    bob.handle_envelope(authority.snapshot()).await;

    alice.submit_edit("alice wrote this");
    bob.submit_edit("bob wrote this");
    assert!(flush_now(&mut alice).await);
    assert!(flush_now(&mut bob).await);

    // The authority happens to see Alice's request first.
    let (alice_reply, broadcast) = authority.handle(alice_out.try_recv().unwrap());
    let (bob_reply, none) = authority.handle(bob_out.try_recv().unwrap());
    assert!(none.is_none(), "stale edit must not broadcast");

    alice.handle_envelope(alice_reply).await;
    bob.handle_envelope(broadcast.unwrap()).await;
    bob.handle_envelope(bob_reply).await;

    // Bob's optimistic edit lost; the authority's state stands everywhere.
    assert_eq!(alice.local_text(), "alice wrote this");
    assert_eq!(bob.local_text(), "alice wrote this");
    assert_eq!(bob.known_version(), Some(DocVersion(2)));
    assert!(!bob.is_in_flight());
    // Nothing left for Bob to retry
    assert!(!flush_now(&mut bob).await);
    assert!(bob_out.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_debounce_window_under_paused_time() {
    let (mut client, mut out) = sync_client("alice");
    client
        .handle_envelope(Authority::new("x").snapshot())
        .await;

    client.submit_edit("xy");
    let deadline = client.flush_deadline().expect("edit arms the timer");

    tokio::time::advance(Duration::from_millis(100)).await;
    assert!(!client.flush_due(Instant::now()).await.unwrap());
    assert!(out.try_recv().is_err());

    // A second edit restarts the quiet window
    client.submit_edit("xyz");
    assert!(client.flush_deadline().unwrap() > deadline);

    tokio::time::advance(Duration::from_millis(301)).await;
    assert!(client.flush_due(Instant::now()).await.unwrap());
    let env = out.try_recv().unwrap();
    match env.signal {
        Signal::DocRequest(req) => assert_eq!(req.text, "xyz"),
        other => panic!("expected doc-request, got {other:?}"),
    }
}
