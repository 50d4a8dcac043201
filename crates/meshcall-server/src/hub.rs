//! Signaling hub
//!
//! Owns the room registry and the per-connection sender map. Inbound
//! envelopes either mutate the registry (`start-call`, disconnects) or are
//! relayed to a single target participant (`offer`/`answer`/`candidate`).
//! Sends are best-effort pushes into each connection's unbounded channel;
//! the per-connection writer task preserves FIFO order to that recipient.

use std::collections::HashMap;

use meshcall_protocol::{Envelope, Payload, StartCallData, UsersData};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::registry::{Participant, RoomRegistry};

/// Resolved identity of a connection that completed `start-call`.
#[derive(Debug, Clone)]
struct Session {
    room: String,
    username: String,
}

pub struct SignalingHub {
    registry: RoomRegistry,
    /// Connection id -> outbound message channel.
    senders: RwLock<HashMap<Uuid, mpsc::UnboundedSender<String>>>,
    /// Connection id -> (room, username), recorded on successful join so
    /// disconnect cleanup is a lookup rather than a hidden attribute.
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl SignalingHub {
    pub fn new() -> Self {
        Self {
            registry: RoomRegistry::new(),
            senders: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub async fn register_connection(
        &self,
        connection_id: Uuid,
        sender: mpsc::UnboundedSender<String>,
    ) {
        self.senders.write().await.insert(connection_id, sender);
        tracing::debug!("connection {} registered", connection_id);
    }

    /// Dispatch one inbound envelope from a connection.
    pub async fn handle_envelope(&self, connection_id: Uuid, envelope: Envelope) {
        match envelope.payload {
            Payload::StartCall(data) => self.start_call(connection_id, data).await,
            Payload::Offer(data) => {
                let room = data.meeting_id.clone();
                let target = data.connected_name.clone();
                self.relay(
                    &room,
                    &target,
                    Envelope::ok(Payload::Offer(data), "offer message"),
                )
                .await;
            }
            Payload::Answer(data) => {
                let room = data.meeting_id.clone();
                let target = data.connected_name.clone();
                self.relay(
                    &room,
                    &target,
                    Envelope::ok(Payload::Answer(data), "answer message"),
                )
                .await;
            }
            Payload::Candidate(data) => {
                let room = data.meeting_id.clone();
                let target = data.connected_name.clone();
                self.relay(
                    &room,
                    &target,
                    Envelope::ok(Payload::Candidate(data), "candidate message"),
                )
                .await;
            }
            // Server-originated types; nothing to do with them inbound.
            Payload::Users(_) | Payload::CallState(_) => {
                tracing::debug!(
                    "ignoring server-originated envelope type from connection {}",
                    connection_id
                );
            }
        }
    }

    /// Join a room. On a name conflict the originating connection gets a
    /// single `call-state` code-300 envelope and nothing is broadcast.
    ///
    /// The roster broadcast is enqueued while the room lock is still held
    /// (via the registry commit hook): a recipient sees its own join
    /// confirmation before any later delta for the same room, so delivery
    /// per connection is FIFO in commit order. The pushes are unbounded
    /// channel sends and never block on a slow connection.
    async fn start_call(&self, connection_id: Uuid, data: StartCallData) {
        let result = {
            let senders = self.senders.read().await;
            self.registry
                .try_add_participant(
                    &data.meeting_id,
                    &data.username,
                    data.audio,
                    data.video,
                    connection_id,
                    |roster| Self::enqueue_roster(&senders, roster),
                )
                .await
        };

        match result {
            Ok(roster) => {
                self.sessions.write().await.insert(
                    connection_id,
                    Session {
                        room: data.meeting_id.clone(),
                        username: data.username.clone(),
                    },
                );

                tracing::info!(
                    "{} joined room {} ({} participants)",
                    data.username,
                    data.meeting_id,
                    roster.len()
                );
            }
            Err(e) => {
                tracing::info!("join rejected: {}", e);
                self.send_to_connection(
                    connection_id,
                    &Envelope::name_taken("username already taken in this room"),
                )
                .await;
            }
        }
    }

    /// Relay an envelope to one participant by name. An absent target is not
    /// an error for the sender: the message is dropped and the next roster
    /// broadcast corrects the sender's view.
    async fn relay(&self, room: &str, target: &str, envelope: Envelope) {
        let roster = self.registry.roster(room).await;
        let Some(participant) = roster.iter().find(|p| p.username == target) else {
            tracing::debug!("dropping relay to {:?} in room {:?}: no such participant", target, room);
            return;
        };

        self.send_to_connection(participant.connection, &envelope)
            .await;
    }

    /// Resolve a closed connection and clean up its room membership. If the
    /// room still has members they receive the updated roster; an emptied
    /// room is gone and nothing is sent. The broadcast is enqueued under the
    /// room lock, same ordering contract as `start_call`.
    pub async fn disconnect(&self, connection_id: Uuid) {
        self.senders.write().await.remove(&connection_id);

        let session = self.sessions.write().await.remove(&connection_id);
        let Some(session) = session else {
            tracing::debug!("connection {} closed before joining a room", connection_id);
            return;
        };

        let roster = {
            let senders = self.senders.read().await;
            self.registry
                .remove_participant(&session.room, &session.username, |roster| {
                    if !roster.is_empty() {
                        Self::enqueue_roster(&senders, roster);
                    }
                })
                .await
        };

        tracing::info!(
            "{} left room {} ({} participants remain)",
            session.username,
            session.room,
            roster.len()
        );
    }

    /// Push the roster to every member, serialized once. The roster carries
    /// media flags only; connection handles stay in the hub. Runs inside a
    /// registry commit hook, so it must not block.
    fn enqueue_roster(
        senders: &HashMap<Uuid, mpsc::UnboundedSender<String>>,
        roster: &[Participant],
    ) {
        let envelope = Envelope::ok(
            Payload::Users(UsersData {
                users: roster.iter().map(Participant::to_room_user).collect(),
            }),
            "Users",
        );

        let json = match serde_json::to_string(&envelope) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("failed to serialize roster broadcast: {}", e);
                return;
            }
        };

        for participant in roster {
            if let Some(sender) = senders.get(&participant.connection) {
                if sender.send(json.clone()).is_err() {
                    tracing::warn!(
                        "failed to queue roster for {} ({})",
                        participant.username,
                        participant.connection
                    );
                }
            }
        }
    }

    async fn send_to_connection(&self, connection_id: Uuid, envelope: &Envelope) {
        let json = match serde_json::to_string(envelope) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("failed to serialize envelope: {}", e);
                return;
            }
        };

        if let Some(sender) = self.senders.read().await.get(&connection_id) {
            if sender.send(json).is_err() {
                tracing::warn!("failed to queue envelope for {}", connection_id);
            }
        }
    }
}

impl Default for SignalingHub {
    fn default() -> Self {
        Self::new()
    }
}
