//! Session negotiation controller
//!
//! One instance per local participant. Consumes `users`/`offer`/`answer`/
//! `candidate` envelopes delivered by the hub plus transport callbacks, and
//! drives the media/transport capabilities to build the connection mesh.
//! Everything is serialized through a single event queue: envelope handling
//! and transport callbacks never interleave against the link and roster
//! maps. The UI collaborator observes the session through the
//! [`SessionUpdate`] stream (rosters and per-participant media handles);
//! it never mutates controller state.
//!
//! Offer direction is fixed by join order: the earlier joiner initiates
//! toward the later one. A confirmed joiner therefore waits for offers from
//! everyone already present, and an in-room member offers to each newcomer
//! the roster announces. Two peers can never offer to each other at once,
//! which removes the glare race by construction.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use meshcall_protocol::{
    AnswerData, CandidateData, Envelope, OfferData, Payload, RoomUser, StartCallData,
    UsersData, CODE_NAME_TAKEN,
};
use tokio::sync::mpsc;

use crate::link::{PeerLink, PeerRole};
use crate::media::{LocalMedia, MediaError, MediaSource, RemoteMedia};
use crate::transport::{LinkEvent, LinkState, NegotiationError, TransportFactory};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub username: String,
    pub meeting_id: String,
    pub audio: bool,
    pub video: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Joining,
    InRoom,
    Ended,
}

/// Inbound stimulus for one session.
#[derive(Debug)]
pub enum SessionEvent {
    /// Envelope delivered by the signaling channel.
    Signal(Envelope),
    /// The signaling channel went away.
    SignalClosed,
    /// Local "end call" request.
    EndCall,
}

/// Read-only session feed for the UI collaborator.
#[derive(Debug)]
pub enum SessionUpdate {
    /// Local join confirmed; peer links toward everyone already present are
    /// in place (awaiting their offers).
    Joined { roster: Vec<RoomUser> },
    /// The hub rejected the join: display name already taken.
    JoinRejected { msg: String },
    /// Membership changed while in the room.
    RosterChanged { roster: Vec<RoomUser> },
    /// Media acquisition failed; the join was aborted.
    MediaFailed { error: MediaError },
    /// A remote participant's track arrived.
    PeerMedia { remote: String, track: RemoteMedia },
    /// Transport connection state changed for one link.
    PeerLinkState { remote: String, state: LinkState },
    /// A negotiation step failed; the link stays but will not progress.
    LinkDegraded { remote: String },
    /// A remote participant left; its link and media are gone.
    PeerLeft { remote: String },
    /// The session is over.
    Ended,
}

/// Cheap cloneable handle for feeding events into a running session.
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    pub fn deliver(&self, envelope: Envelope) {
        let _ = self.events.send(SessionEvent::Signal(envelope));
    }

    pub fn signal_closed(&self) {
        let _ = self.events.send(SessionEvent::SignalClosed);
    }

    pub fn end_call(&self) {
        let _ = self.events.send(SessionEvent::EndCall);
    }
}

pub struct SessionController {
    config: SessionConfig,
    phase: SessionPhase,
    roster: Vec<RoomUser>,
    links: HashMap<String, PeerLink>,
    local_media: Option<LocalMedia>,
    media: Arc<dyn MediaSource>,
    transports: Arc<dyn TransportFactory>,
    outbound: mpsc::UnboundedSender<Envelope>,
    updates: mpsc::UnboundedSender<SessionUpdate>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        media: Arc<dyn MediaSource>,
        transports: Arc<dyn TransportFactory>,
        outbound: mpsc::UnboundedSender<Envelope>,
        updates: mpsc::UnboundedSender<SessionUpdate>,
    ) -> (Self, SessionHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::unbounded_channel();

        let controller = Self {
            config,
            phase: SessionPhase::Idle,
            roster: Vec::new(),
            links: HashMap::new(),
            local_media: None,
            media,
            transports,
            outbound,
            updates,
            events_rx,
            link_tx,
            link_rx,
        };

        (controller, SessionHandle { events: events_tx })
    }

    /// Drive the session until it ends. Sends `start-call` immediately
    /// (`Idle -> Joining`), then serializes every envelope and transport
    /// callback through the event loop.
    pub async fn run(mut self) {
        self.phase = SessionPhase::Joining;
        self.send(
            Payload::StartCall(StartCallData {
                username: self.config.username.clone(),
                meeting_id: self.config.meeting_id.clone(),
                audio: self.config.audio,
                video: self.config.video,
            }),
            "start-call",
        );

        loop {
            tokio::select! {
                event = self.events_rx.recv() => match event {
                    Some(SessionEvent::Signal(envelope)) => self.handle_signal(envelope).await,
                    Some(SessionEvent::SignalClosed) => {
                        tracing::info!("signaling channel closed; ending session");
                        self.shutdown().await;
                        break;
                    }
                    Some(SessionEvent::EndCall) | None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(event) = self.link_rx.recv() => self.handle_link_event(event).await,
            }
        }
    }

    async fn handle_signal(&mut self, envelope: Envelope) {
        if self.phase == SessionPhase::Ended {
            return;
        }

        match envelope.payload {
            Payload::Users(UsersData { users }) => self.handle_roster(users).await,
            Payload::Offer(data) => self.handle_offer(data).await,
            Payload::Answer(data) => self.handle_answer(data).await,
            Payload::Candidate(data) => self.handle_candidate(data).await,
            Payload::CallState(_) if envelope.code == CODE_NAME_TAKEN => {
                tracing::info!("join rejected: {}", envelope.msg);
                self.phase = SessionPhase::Idle;
                let _ = self
                    .updates
                    .send(SessionUpdate::JoinRejected { msg: envelope.msg });
            }
            Payload::CallState(_) => {}
            Payload::StartCall(_) => {
                tracing::debug!("ignoring client-originated envelope type");
            }
        }
    }

    /// Apply a roster broadcast: tear down links for departed names, then
    /// act on the newest entry. The last roster entry is always the most
    /// recent joiner, so "last is me" confirms the local join and any other
    /// last entry is a newcomer the local (earlier) session must offer to.
    async fn handle_roster(&mut self, users: Vec<RoomUser>) {
        let Some(last) = users.last().cloned() else {
            return;
        };

        let present: HashSet<&str> = users.iter().map(|u| u.username.as_str()).collect();
        let removed: Vec<String> = self
            .links
            .keys()
            .filter(|name| !present.contains(name.as_str()))
            .cloned()
            .collect();
        for name in removed {
            self.teardown_link(&name).await;
        }

        self.roster = users;

        match self.phase {
            SessionPhase::Joining if last.username == self.config.username => {
                self.confirm_join().await;
            }
            SessionPhase::InRoom => {
                if last.username != self.config.username {
                    if let Err(e) = self.initiate_link(&last.username).await {
                        tracing::warn!("failed to initiate link to {}: {}", last.username, e);
                        let _ = self.updates.send(SessionUpdate::LinkDegraded {
                            remote: last.username.clone(),
                        });
                    }
                }
                let _ = self.updates.send(SessionUpdate::RosterChanged {
                    roster: self.roster.clone(),
                });
            }
            phase => tracing::debug!("ignoring roster update in phase {:?}", phase),
        }
    }

    /// `Joining -> InRoom`: acquire local media, then set up a responder
    /// link toward every participant that was already present. Media
    /// failure aborts the transition; the signaling session stays open.
    async fn confirm_join(&mut self) {
        let media = match self
            .media
            .acquire(self.config.audio, self.config.video)
            .await
        {
            Ok(media) => media,
            Err(e) => {
                tracing::warn!("media acquisition failed, join aborted: {}", e);
                let _ = self.updates.send(SessionUpdate::MediaFailed { error: e });
                return;
            }
        };
        self.local_media = Some(media);
        self.phase = SessionPhase::InRoom;

        tracing::info!(
            "{} joined room {} with {} other participant(s)",
            self.config.username,
            self.config.meeting_id,
            self.roster.len().saturating_sub(1)
        );

        let earlier: Vec<String> = self
            .roster
            .iter()
            .map(|u| u.username.clone())
            .filter(|name| *name != self.config.username)
            .collect();
        for name in earlier {
            if let Err(e) = self.open_link(&name, PeerRole::Responder).await {
                tracing::warn!("failed to open link to {}: {}", name, e);
                let _ = self
                    .updates
                    .send(SessionUpdate::LinkDegraded { remote: name });
            }
        }

        let _ = self.updates.send(SessionUpdate::Joined {
            roster: self.roster.clone(),
        });
    }

    /// Create a link if one does not exist yet; duplicate creation attempts
    /// are no-ops. Local tracks are attached at creation so both offers and
    /// answers carry media.
    async fn open_link(&mut self, remote: &str, role: PeerRole) -> Result<(), NegotiationError> {
        if self.links.contains_key(remote) {
            tracing::debug!("link to {} already exists", remote);
            return Ok(());
        }

        let transport = self
            .transports
            .open_link(remote, self.link_tx.clone())
            .await?;
        let link = PeerLink::new(remote, role, transport);

        if let Some(media) = self.local_media.clone() {
            for track in &media.tracks {
                link.transport.add_track(track.as_ref()).await?;
            }
        }

        self.links.insert(remote.to_string(), link);
        Ok(())
    }

    /// Offer toward a later joiner: open the link, produce and apply the
    /// local offer, and send it through the hub.
    async fn initiate_link(&mut self, remote: &str) -> Result<(), NegotiationError> {
        if self.links.contains_key(remote) {
            return Ok(());
        }

        self.open_link(remote, PeerRole::Initiator).await?;
        let Some(link) = self.links.get_mut(remote) else {
            return Ok(());
        };

        let offer = link.transport.create_offer().await?;
        link.transport.set_local_description(offer.clone()).await?;

        self.send(
            Payload::Offer(OfferData {
                offer,
                connected_name: remote.to_string(),
                call_name: self.config.username.clone(),
                meeting_id: self.config.meeting_id.clone(),
            }),
            "offer",
        );
        Ok(())
    }

    /// An offer can only come from an earlier joiner, so the responder link
    /// already exists from roster-diff time; an offer without a link is
    /// dropped.
    async fn handle_offer(&mut self, data: OfferData) {
        let remote = data.call_name;
        let Some(link) = self.links.get_mut(&remote) else {
            tracing::warn!("offer from {} with no peer link; dropping", remote);
            return;
        };

        // Offers only flow from earlier joiners; this side opened the link
        // as the initiator, so the peer has no business offering.
        if link.role != PeerRole::Responder {
            tracing::warn!("offer from {} on an initiator link; dropping", remote);
            return;
        }

        if let Err(e) = link.apply_remote_description(data.offer).await {
            tracing::warn!("failed to apply offer from {}: {}", remote, e);
            link.degraded = true;
            let _ = self.updates.send(SessionUpdate::LinkDegraded { remote });
            return;
        }

        let answer = match link.transport.create_answer().await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!("failed to create answer for {}: {}", remote, e);
                link.degraded = true;
                let _ = self.updates.send(SessionUpdate::LinkDegraded { remote });
                return;
            }
        };

        if let Err(e) = link.transport.set_local_description(answer.clone()).await {
            tracing::warn!("failed to apply local answer for {}: {}", remote, e);
            link.degraded = true;
            let _ = self.updates.send(SessionUpdate::LinkDegraded { remote });
            return;
        }

        self.send(
            Payload::Answer(AnswerData {
                answer,
                connected_name: remote,
                call_name: self.config.username.clone(),
                meeting_id: self.config.meeting_id.clone(),
            }),
            "answer",
        );
    }

    async fn handle_answer(&mut self, data: AnswerData) {
        let remote = data.call_name;
        let Some(link) = self.links.get_mut(&remote) else {
            tracing::warn!("answer from {} with no peer link; dropping", remote);
            return;
        };

        if let Err(e) = link.apply_remote_description(data.answer).await {
            tracing::warn!("failed to apply answer from {}: {}", remote, e);
            link.degraded = true;
            let _ = self.updates.send(SessionUpdate::LinkDegraded { remote });
        }
    }

    async fn handle_candidate(&mut self, data: CandidateData) {
        let remote = data.call_name;
        let Some(link) = self.links.get_mut(&remote) else {
            // The peer may already have left; the roster update resolved it.
            tracing::debug!("candidate from {} with no peer link; dropping", remote);
            return;
        };

        if let Err(e) = link.add_candidate(data.candidate).await {
            tracing::warn!("failed to apply candidate from {}: {}", remote, e);
            link.degraded = true;
            let _ = self.updates.send(SessionUpdate::LinkDegraded { remote });
        }
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        if self.phase == SessionPhase::Ended {
            return;
        }

        match event {
            LinkEvent::LocalCandidate { remote, candidate } => {
                if !self.links.contains_key(&remote) {
                    return;
                }
                self.send(
                    Payload::Candidate(CandidateData {
                        candidate,
                        connected_name: remote,
                        call_name: self.config.username.clone(),
                        meeting_id: self.config.meeting_id.clone(),
                    }),
                    "candidate",
                );
            }
            LinkEvent::RemoteTrack { remote, track } => {
                // Tracks from an already-departed peer are dropped with the
                // link's other resources.
                if self.links.contains_key(&remote) {
                    let _ = self
                        .updates
                        .send(SessionUpdate::PeerMedia { remote, track });
                }
            }
            LinkEvent::StateChanged { remote, state } => {
                if let Some(link) = self.links.get_mut(&remote) {
                    link.state = state;
                    let _ = self
                        .updates
                        .send(SessionUpdate::PeerLinkState { remote, state });
                }
            }
        }
    }

    async fn teardown_link(&mut self, remote: &str) {
        if let Some(mut link) = self.links.remove(remote) {
            link.close().await;
            let _ = self.updates.send(SessionUpdate::PeerLeft {
                remote: remote.to_string(),
            });
            tracing::info!("tore down link to departed peer {}", remote);
        }
    }

    /// `-> Ended`: cancel negotiation on every link and release all media
    /// and transport resources. Safe to invoke when already ended.
    async fn shutdown(&mut self) {
        if self.phase == SessionPhase::Ended {
            return;
        }

        let links = std::mem::take(&mut self.links);
        for (_, mut link) in links {
            link.close().await;
        }
        self.local_media = None;
        self.roster.clear();
        self.phase = SessionPhase::Ended;

        let _ = self.updates.send(SessionUpdate::Ended);
        tracing::info!("session ended");
    }

    fn send(&self, payload: Payload, msg: &str) {
        if self.outbound.send(Envelope::ok(payload, msg)).is_err() {
            tracing::warn!("signaling channel gone; dropping outbound envelope");
        }
    }
}
