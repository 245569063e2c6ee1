//! Call orchestration: one-to-many audio calls over the signaling channel.
//!
//! ## Architecture
//!
//! ```text
//! start_call / accept_call / decline_call / hangup        (UI intent)
//!        │
//!        ▼
//! ┌─────────────┐   lookup_or_create    ┌──────────────┐
//! │ CallManager │ ────────────────────► │ PeerSession  │  (one per peer)
//! │  sessions   │                       │  state + link│
//! └──────┬──────┘                       └──────┬───────┘
//!        │ Envelope (offer/answer/candidate)   │ PeerLink ops
//!        ▼                                     ▼
//!   outgoing_tx ──► signaling channel    external engine
//! ```
//!
//! Every signaling envelope, link callback, and UI intent is delivered as
//! one `&mut self` method call, so state mutation for a given peer is
//! structurally serialized: an `accept_call` and a second inbound offer
//! for the same peer cannot race to build two links.
//!
//! Session lifecycle:
//!
//! ```text
//! Idle ──start_call──► Offering ──answer──► Connecting ──link──► Connected
//!   │                      │                    │                    │
//!   └──offer──► Ringing (queued, no session) ──accept──►┘            │
//!                       │                                            │
//!                       └─decline                 terminal state ────┤
//!                                                 or hangup ────► Closed
//! ```

use std::collections::{HashMap, HashSet, VecDeque};

use agora_core::ParticipantId;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::media::{
    IceCandidate, LinkError, LinkEvent, LinkFactory, MediaError, MediaSource, MediaStream,
    PeerLink, SessionDescription,
};
use crate::protocol::{Envelope, Signal};

/// Lifecycle of one peer's call leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Known but not negotiating (e.g. a failed offer eligible for retry)
    Idle,
    /// We sent an offer and await the answer
    Offering,
    /// Their offer is queued awaiting accept/decline. No session (and
    /// no link) exists yet; [`CallManager::session_state`] derives this
    /// state from the incoming-call queue.
    Ringing,
    /// Descriptions exchanged; transport still establishing
    Connecting,
    /// The link reported a live connection
    Connected,
    /// Torn down
    Closed,
}

/// Bookkeeping for one remote participant's call lifecycle.
///
/// Owns its [`PeerLink`] exclusively; the link is created on first need
/// and closed exactly once on teardown.
pub struct PeerSession {
    peer_id: ParticipantId,
    state: SessionState,
    link: Option<Box<dyn PeerLink>>,
    /// Candidates that arrived before the remote description was set,
    /// flushed in arrival order right after it succeeds.
    pending_candidates: Vec<IceCandidate>,
    /// Outgoing candidate strings already transmitted for this link.
    sent_candidates: HashSet<String>,
    remote_described: bool,
    /// Remote tracks; grows monotonically until close.
    remote_tracks: Vec<crate::media::MediaTrack>,
}

impl PeerSession {
    fn new(peer_id: ParticipantId) -> Self {
        Self {
            peer_id,
            state: SessionState::Idle,
            link: None,
            pending_candidates: Vec::new(),
            sent_candidates: HashSet::new(),
            remote_described: false,
            remote_tracks: Vec::new(),
        }
    }

    pub fn peer_id(&self) -> &ParticipantId {
        &self.peer_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn remote_tracks(&self) -> &[crate::media::MediaTrack] {
        &self.remote_tracks
    }
}

/// Errors scoped to one call attempt. Nothing here is fatal to the manager.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("signaling transport unavailable")]
    Transport,
    #[error("no pending offer for that peer")]
    NoPendingOffer,
}

/// Per-target result of [`CallManager::start_call`]. A failure for one
/// target never aborts the others.
#[derive(Debug, Default)]
pub struct CallOutcome {
    pub placed: Vec<ParticipantId>,
    pub failed: Vec<(ParticipantId, CallError)>,
}

/// Events for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// The accept/decline queue changed
    IncomingCallsChanged(Vec<ParticipantId>),
    /// The set of confirmed call partners changed
    InCallChanged(Vec<ParticipantId>),
    /// A remote track became available for playback
    RemoteTrackAdded {
        peer: ParticipantId,
        track: crate::media::MediaTrack,
    },
    /// A peer's remote stream was released on teardown
    RemoteStreamClosed(ParticipantId),
    /// The callee refused our offer
    CallDeclined(ParticipantId),
}

/// Owns every [`PeerSession`] for the local user, the lazily acquired
/// local audio stream, and the incoming-call queue.
///
/// Sessions are keyed by the canonical (prefix-stripped) peer id so that
/// the two origins of the same identifier land in one slot.
pub struct CallManager {
    local_id: ParticipantId,
    sessions: HashMap<String, PeerSession>,
    incoming_calls: VecDeque<ParticipantId>,
    pending_offers: HashMap<String, SessionDescription>,
    /// Candidates that arrived before any session existed for the peer,
    /// moved onto the session when it is created.
    early_candidates: HashMap<String, Vec<IceCandidate>>,
    local_stream: Option<MediaStream>,
    in_call_with: HashSet<String>,
    media: Box<dyn MediaSource>,
    link_factory: LinkFactory,
    outgoing_tx: mpsc::Sender<Envelope>,
    event_tx: mpsc::Sender<CallEvent>,
    event_rx: Option<mpsc::Receiver<CallEvent>>,
}

impl CallManager {
    pub fn new(
        local_id: ParticipantId,
        media: Box<dyn MediaSource>,
        link_factory: LinkFactory,
        outgoing_tx: mpsc::Sender<Envelope>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            local_id,
            sessions: HashMap::new(),
            incoming_calls: VecDeque::new(),
            pending_offers: HashMap::new(),
            early_candidates: HashMap::new(),
            local_stream: None,
            in_call_with: HashSet::new(),
            media,
            link_factory,
            outgoing_tx,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<CallEvent>> {
        self.event_rx.take()
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    /// Peers awaiting accept/decline, in arrival order.
    pub fn incoming_calls(&self) -> Vec<ParticipantId> {
        self.incoming_calls.iter().cloned().collect()
    }

    /// Peers with a confirmed (answered) connection, sorted for stability.
    pub fn in_call_with(&self) -> Vec<ParticipantId> {
        let mut peers: Vec<_> = self.in_call_with.iter().cloned().collect();
        peers.sort();
        peers.into_iter().map(ParticipantId::new).collect()
    }

    /// The state of `peer`'s call leg. A peer whose offer is queued
    /// awaiting accept/decline has no session yet and reports `Ringing`.
    pub fn session_state(&self, peer: &ParticipantId) -> Option<SessionState> {
        if let Some(session) = self.sessions.get(peer.canonical()) {
            return Some(session.state);
        }
        if self.pending_offers.contains_key(peer.canonical()) {
            return Some(SessionState::Ringing);
        }
        None
    }

    pub fn session(&self, peer: &ParticipantId) -> Option<&PeerSession> {
        self.sessions.get(peer.canonical())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn local_stream(&self) -> Option<&MediaStream> {
        self.local_stream.as_ref()
    }

    // ───────────────────────────────────────────────────────────────
    // UI intents
    // ───────────────────────────────────────────────────────────────

    /// Offer a call to each target. Self targets are skipped, local media
    /// is acquired once and shared across the batch, and a failure for
    /// one target is recorded in the outcome without aborting the rest.
    pub async fn start_call(&mut self, targets: &[ParticipantId]) -> CallOutcome {
        let mut outcome = CallOutcome::default();
        let targets: Vec<ParticipantId> = targets
            .iter()
            .filter(|t| !t.matches(&self.local_id))
            .cloned()
            .collect();
        if targets.is_empty() {
            return outcome;
        }

        let stream = match self.ensure_local_stream().await {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("local audio unavailable: {e}");
                for target in targets {
                    outcome.failed.push((target, CallError::Media(e.clone())));
                }
                return outcome;
            }
        };

        for target in targets {
            match self.place_offer(&target, &stream).await {
                Ok(true) => outcome.placed.push(target),
                Ok(false) => {} // negotiation already in progress
                Err(e) => {
                    log::warn!("offer to {target} failed: {e}");
                    outcome.failed.push((target, e));
                }
            }
        }
        outcome
    }

    /// Accept a queued incoming call. The queue and stashed-offer entries
    /// for the peer are consumed exactly once whether or not the
    /// negotiation below succeeds.
    pub async fn accept_call(&mut self, peer: &ParticipantId) -> Result<(), CallError> {
        let key = peer.canonical().to_owned();
        let offer = self.pending_offers.remove(&key);
        if self.remove_incoming(&key) {
            let snapshot = self.incoming_calls();
            self.emit(CallEvent::IncomingCallsChanged(snapshot)).await;
        }
        let Some(offer) = offer else {
            return Err(CallError::NoPendingOffer);
        };

        let result = self.connect_to_offer(peer, offer).await;
        if let Err(ref e) = result {
            log::warn!("accept of call from {peer} failed: {e}");
            // Drop anything partially built so the peer is retryable.
            self.close_session(peer).await;
        }
        result
    }

    /// Decline a queued incoming call. No link is ever created for a
    /// declined call; safe to call for a peer with no queue entry.
    pub async fn decline_call(&mut self, peer: &ParticipantId) -> Result<(), CallError> {
        let key = peer.canonical().to_owned();
        let had_offer = self.pending_offers.remove(&key).is_some();
        let had_entry = self.remove_incoming(&key);
        self.early_candidates.remove(&key);
        if had_entry {
            let snapshot = self.incoming_calls();
            self.emit(CallEvent::IncomingCallsChanged(snapshot)).await;
        }
        if !(had_offer || had_entry) {
            return Ok(());
        }
        self.send(Envelope::call_declined(self.local_id.clone(), peer.clone()))
            .await
    }

    /// Tear down every session and release local capture. Idempotent.
    pub async fn hangup(&mut self) {
        let peers: Vec<ParticipantId> =
            self.sessions.values().map(|s| s.peer_id.clone()).collect();
        for peer in peers {
            self.close_session(&peer).await;
        }
        if let Some(stream) = self.local_stream.take() {
            self.media.release(&stream);
            log::info!("local audio released");
        }
        self.pending_offers.clear();
        self.early_candidates.clear();
        if !self.incoming_calls.is_empty() {
            self.incoming_calls.clear();
            self.emit(CallEvent::IncomingCallsChanged(Vec::new())).await;
        }
        self.in_call_with.clear();
    }

    // ───────────────────────────────────────────────────────────────
    // Envelope and link-event dispatch
    // ───────────────────────────────────────────────────────────────

    /// Deliver one signaling envelope. Envelopes addressed elsewhere,
    /// without a sender, or from ourselves are dropped silently.
    pub async fn handle_envelope(&mut self, env: Envelope) {
        if !env.addressed_to(&self.local_id) {
            log::debug!("{} not addressed to us, dropped", env.signal.kind());
            return;
        }
        let Some(from) = env.from else {
            if env.signal.is_call() {
                log::debug!("{} without sender, dropped", env.signal.kind());
            }
            return;
        };
        if from.matches(&self.local_id) {
            return;
        }
        match env.signal {
            Signal::Offer(sdp) => self.on_offer(from, sdp).await,
            Signal::Answer(sdp) => self.on_answer(from, sdp).await,
            Signal::IceCandidate(candidate) => self.on_candidate(from, candidate).await,
            Signal::CallDeclined => self.on_declined(from).await,
            other => {
                log::debug!("non-call signal {} ignored by call manager", other.kind());
            }
        }
    }

    /// Deliver one link callback for `peer`'s session.
    pub async fn handle_link_event(&mut self, peer: &ParticipantId, event: LinkEvent) {
        let key = peer.canonical().to_owned();
        match event {
            LinkEvent::LocalCandidate(candidate) => {
                let local = self.local_id.clone();
                let env = {
                    let Some(session) = self.sessions.get_mut(&key) else {
                        return;
                    };
                    if !session.sent_candidates.insert(candidate.candidate.clone()) {
                        log::debug!("duplicate local candidate for {peer} suppressed");
                        return;
                    }
                    Envelope::ice_candidate(local, session.peer_id.clone(), candidate)
                };
                if let Err(e) = self.send(env).await {
                    log::warn!("candidate for {peer} not sent: {e}");
                }
            }
            LinkEvent::RemoteTrack(track) => {
                let peer_id = {
                    let Some(session) = self.sessions.get_mut(&key) else {
                        return;
                    };
                    session.remote_tracks.push(track.clone());
                    session.peer_id.clone()
                };
                self.emit(CallEvent::RemoteTrackAdded {
                    peer: peer_id,
                    track,
                })
                .await;
            }
            LinkEvent::StateChanged(state) => {
                if state.is_terminal() {
                    self.close_session(peer).await;
                } else if state == crate::media::LinkState::Connected {
                    if let Some(session) = self.sessions.get_mut(&key) {
                        if session.state == SessionState::Connecting {
                            session.state = SessionState::Connected;
                        }
                    }
                }
            }
        }
    }

    /// Tear down one peer's session: stop sent tracks, close the link,
    /// release the remote stream, forget the peer. Idempotent — the
    /// session is removed from the registry before any release step, so
    /// a second trigger finds nothing to do.
    pub async fn close_session(&mut self, peer: &ParticipantId) {
        let key = peer.canonical().to_owned();
        let Some(mut session) = self.sessions.remove(&key) else {
            return;
        };
        log::info!("closing session with {}", session.peer_id);
        session.state = SessionState::Closed;
        if let Some(link) = session.link.as_mut() {
            link.detach_local_tracks();
            link.close();
        }
        if !session.remote_tracks.is_empty() {
            session.remote_tracks.clear();
            self.emit(CallEvent::RemoteStreamClosed(session.peer_id.clone()))
                .await;
        }
        if self.in_call_with.remove(&key) {
            let snapshot = self.in_call_with();
            self.emit(CallEvent::InCallChanged(snapshot)).await;
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Internals
    // ───────────────────────────────────────────────────────────────

    async fn ensure_local_stream(&mut self) -> Result<MediaStream, MediaError> {
        if let Some(stream) = &self.local_stream {
            return Ok(stream.clone());
        }
        let stream = self.media.acquire_audio().await?;
        log::info!("local audio acquired: {}", stream.id);
        self.local_stream = Some(stream.clone());
        Ok(stream)
    }

    /// Build a link, negotiate an offer, and transmit it. On failure the
    /// link is closed and no session is registered (or an existing one is
    /// left `Idle`), so the target stays eligible for retry.
    async fn place_offer(
        &mut self,
        target: &ParticipantId,
        stream: &MediaStream,
    ) -> Result<bool, CallError> {
        let key = target.canonical().to_owned();
        if self
            .sessions
            .get(&key)
            .is_some_and(|s| s.state != SessionState::Idle)
        {
            log::debug!("offer to {target} skipped: negotiation already in progress");
            return Ok(false);
        }

        let mut link = (self.link_factory)(target);
        let offer = match Self::negotiate_offer(link.as_mut(), stream).await {
            Ok(offer) => offer,
            Err(e) => {
                link.close();
                return Err(e.into());
            }
        };
        if let Err(e) = self
            .send(Envelope::offer(self.local_id.clone(), target.clone(), offer))
            .await
        {
            link.close();
            return Err(e);
        }

        let session = self.lookup_or_create(target);
        session.link = Some(link);
        session.state = SessionState::Offering;
        Ok(true)
    }

    async fn negotiate_offer(
        link: &mut dyn PeerLink,
        stream: &MediaStream,
    ) -> Result<SessionDescription, LinkError> {
        for track in &stream.tracks {
            link.attach_local_track(track, &stream.id)?;
        }
        let offer = link.create_offer().await?;
        link.set_local_description(&offer).await?;
        Ok(offer)
    }

    /// The accept path: media, link, remote description, buffered
    /// candidate flush, answer.
    async fn connect_to_offer(
        &mut self,
        peer: &ParticipantId,
        offer: SessionDescription,
    ) -> Result<(), CallError> {
        let key = peer.canonical().to_owned();
        let stream = self.ensure_local_stream().await?;
        let pending = self.take_buffered_candidates(&key);

        let mut link = (self.link_factory)(peer);
        let answer =
            match Self::negotiate_answer(link.as_mut(), &stream, &offer, &pending).await {
                Ok(answer) => answer,
                Err(e) => {
                    link.close();
                    return Err(e.into());
                }
            };
        if let Err(e) = self
            .send(Envelope::answer(self.local_id.clone(), peer.clone(), answer))
            .await
        {
            link.close();
            return Err(e);
        }

        let session = self.lookup_or_create(peer);
        session.link = Some(link);
        session.remote_described = true;
        session.state = SessionState::Connecting;
        if self.in_call_with.insert(key) {
            let snapshot = self.in_call_with();
            self.emit(CallEvent::InCallChanged(snapshot)).await;
        }
        Ok(())
    }

    async fn negotiate_answer(
        link: &mut dyn PeerLink,
        stream: &MediaStream,
        offer: &SessionDescription,
        pending: &[IceCandidate],
    ) -> Result<SessionDescription, LinkError> {
        for track in &stream.tracks {
            link.attach_local_track(track, &stream.id)?;
        }
        link.set_remote_description(offer).await?;
        // Buffered candidates go in right after the remote description,
        // in original arrival order. A bad candidate is peer-engine noise,
        // not grounds to abort the accept.
        for candidate in pending {
            if let Err(e) = link.add_ice_candidate(candidate).await {
                log::warn!("buffered candidate rejected: {e}");
            }
        }
        let answer = link.create_answer().await?;
        link.set_local_description(&answer).await?;
        Ok(answer)
    }

    async fn on_offer(&mut self, from: ParticipantId, sdp: SessionDescription) {
        let key = from.canonical().to_owned();
        if self.sessions.get(&key).is_some_and(|s| {
            matches!(
                s.state,
                SessionState::Offering | SessionState::Connecting | SessionState::Connected
            )
        }) {
            log::debug!("repeat offer from {from} ignored: session already negotiating");
            return;
        }
        // Newest offer wins the stash; the queue entry is idempotent.
        self.pending_offers.insert(key.clone(), sdp);
        let already_queued = self
            .incoming_calls
            .iter()
            .any(|p| p.canonical() == key);
        if !already_queued {
            self.incoming_calls.push_back(from);
            let snapshot = self.incoming_calls();
            self.emit(CallEvent::IncomingCallsChanged(snapshot)).await;
        }
    }

    async fn on_answer(&mut self, from: ParticipantId, sdp: SessionDescription) {
        let key = from.canonical().to_owned();
        let flushed = {
            let Some(session) = self.sessions.get_mut(&key) else {
                log::debug!("answer from {from} without session, dropped");
                return;
            };
            if !matches!(
                session.state,
                SessionState::Offering | SessionState::Connecting
            ) {
                log::debug!("answer from {from} in state {:?}, dropped", session.state);
                return;
            }
            let Some(link) = session.link.as_mut() else {
                log::warn!("answer from {from} but session has no link");
                return;
            };
            if let Err(e) = link.set_remote_description(&sdp).await {
                log::warn!("remote description from {from} rejected: {e}");
                return;
            }
            session.remote_described = true;
            session.state = SessionState::Connecting;
            let pending = std::mem::take(&mut session.pending_candidates);
            for candidate in &pending {
                if let Err(e) = link.add_ice_candidate(candidate).await {
                    log::warn!("buffered candidate rejected: {e}");
                }
            }
            true
        };
        if flushed && self.in_call_with.insert(key) {
            let snapshot = self.in_call_with();
            self.emit(CallEvent::InCallChanged(snapshot)).await;
        }
    }

    async fn on_candidate(&mut self, from: ParticipantId, candidate: IceCandidate) {
        let key = from.canonical().to_owned();
        match self.sessions.get_mut(&key) {
            Some(session) if session.remote_described => {
                let Some(link) = session.link.as_mut() else {
                    return;
                };
                if let Err(e) = link.add_ice_candidate(&candidate).await {
                    log::warn!("candidate from {from} rejected: {e}");
                }
            }
            Some(session) => session.pending_candidates.push(candidate),
            None => self
                .early_candidates
                .entry(key)
                .or_default()
                .push(candidate),
        }
    }

    async fn on_declined(&mut self, from: ParticipantId) {
        let key = from.canonical().to_owned();
        if self
            .sessions
            .get(&key)
            .is_some_and(|s| s.state == SessionState::Offering)
        {
            log::info!("{from} declined the call");
            self.close_session(&from).await;
            self.emit(CallEvent::CallDeclined(from)).await;
        }
    }

    fn lookup_or_create(&mut self, peer: &ParticipantId) -> &mut PeerSession {
        let key = peer.canonical().to_owned();
        let early = self.early_candidates.remove(&key).unwrap_or_default();
        let session = self
            .sessions
            .entry(key)
            .or_insert_with(|| PeerSession::new(peer.clone()));
        session.pending_candidates.extend(early);
        session
    }

    /// Candidates buffered for a peer with no link yet, in arrival order.
    fn take_buffered_candidates(&mut self, key: &str) -> Vec<IceCandidate> {
        let mut pending = self
            .sessions
            .get_mut(key)
            .map(|s| std::mem::take(&mut s.pending_candidates))
            .unwrap_or_default();
        pending.extend(self.early_candidates.remove(key).unwrap_or_default());
        pending
    }

    fn remove_incoming(&mut self, key: &str) -> bool {
        let before = self.incoming_calls.len();
        self.incoming_calls.retain(|p| p.canonical() != key);
        self.incoming_calls.len() != before
    }

    async fn send(&self, env: Envelope) -> Result<(), CallError> {
        self.outgoing_tx
            .send(env)
            .await
            .map_err(|_| CallError::Transport)
    }

    async fn emit(&self, event: CallEvent) {
        let _ = self.event_tx.send(event).await;
    }
}
