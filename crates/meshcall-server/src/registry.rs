//! Room registry
//!
//! Pure in-memory participant bookkeeping: room id -> ordered participants.
//! All mutation of a single room happens under that room's lock, so the
//! unique-name and empty-room-deleted invariants cannot race; operations on
//! different rooms proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use meshcall_protocol::RoomUser;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("username {username:?} already taken in room {room:?}")]
    NameConflict { room: String, username: String },
}

/// One joined identity within a room. Updated only by the hub; the
/// connection handle is an opaque id into the hub's sender map and never
/// leaves the server.
#[derive(Debug, Clone)]
pub struct Participant {
    pub username: String,
    pub audio: bool,
    pub video: bool,
    pub join_seq: u64,
    pub connection: Uuid,
}

impl Participant {
    pub fn to_room_user(&self) -> RoomUser {
        RoomUser {
            username: self.username.clone(),
            audio: self.audio,
            video: self.video,
        }
    }
}

#[derive(Default)]
struct Room {
    next_seq: u64,
    participants: Vec<Participant>,
    /// Set when the room empties; a handle acquired before teardown must not
    /// resurrect it.
    closed: bool,
}

pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Mutex<Room>>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Idempotently get or create the room entry.
    async fn ensure_room(&self, room_id: &str) -> Arc<Mutex<Room>> {
        if let Some(room) = self.rooms.read().await.get(room_id) {
            return room.clone();
        }

        self.rooms
            .write()
            .await
            .entry(room_id.to_string())
            .or_default()
            .clone()
    }

    /// Remove the map entry if it still points at `stale`. A newer room may
    /// already have taken the slot.
    async fn drop_if_stale(&self, room_id: &str, stale: &Arc<Mutex<Room>>) {
        let mut rooms = self.rooms.write().await;
        if let Some(current) = rooms.get(room_id) {
            if Arc::ptr_eq(current, stale) {
                rooms.remove(room_id);
            }
        }
    }

    /// Add a participant, creating the room on first join. Returns the
    /// resulting roster in join order, or `NameConflict` without mutating
    /// anything. `on_commit` runs with the new roster while the room lock is
    /// still held, so whatever it enqueues lands in commit order across
    /// concurrent joins to the same room.
    pub async fn try_add_participant(
        &self,
        room_id: &str,
        username: &str,
        audio: bool,
        video: bool,
        connection: Uuid,
        on_commit: impl FnOnce(&[Participant]),
    ) -> Result<Vec<Participant>, RegistryError> {
        loop {
            let room = self.ensure_room(room_id).await;
            let mut guard = room.lock().await;

            if guard.closed {
                // Raced with teardown of an emptied room; retire the stale
                // handle and retry against a fresh one.
                drop(guard);
                self.drop_if_stale(room_id, &room).await;
                continue;
            }

            if guard.participants.iter().any(|p| p.username == username) {
                return Err(RegistryError::NameConflict {
                    room: room_id.to_string(),
                    username: username.to_string(),
                });
            }

            let join_seq = guard.next_seq;
            guard.next_seq += 1;
            guard.participants.push(Participant {
                username: username.to_string(),
                audio,
                video,
                join_seq,
                connection,
            });

            on_commit(&guard.participants);
            return Ok(guard.participants.clone());
        }
    }

    /// Remove a participant and return the remaining roster. The room entry
    /// is deleted, not left empty, when its last participant goes.
    /// `on_commit` runs with the remaining roster under the room lock, same
    /// ordering contract as `try_add_participant`.
    pub async fn remove_participant(
        &self,
        room_id: &str,
        username: &str,
        on_commit: impl FnOnce(&[Participant]),
    ) -> Vec<Participant> {
        let room = match self.rooms.read().await.get(room_id) {
            Some(room) => room.clone(),
            None => return Vec::new(),
        };

        let mut guard = room.lock().await;
        guard.participants.retain(|p| p.username != username);
        let roster = guard.participants.clone();
        on_commit(&guard.participants);

        if roster.is_empty() {
            guard.closed = true;
            drop(guard);
            self.drop_if_stale(room_id, &room).await;
        }

        roster
    }

    /// Ordered roster snapshot; empty if the room does not exist.
    pub async fn roster(&self, room_id: &str) -> Vec<Participant> {
        let room = match self.rooms.read().await.get(room_id) {
            Some(room) => room.clone(),
            None => return Vec::new(),
        };

        let guard = room.lock().await;
        guard.participants.clone()
    }

    #[cfg(test)]
    async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Uuid {
        Uuid::new_v4()
    }

    #[tokio::test]
    async fn joins_keep_stable_join_order() {
        let registry = RoomRegistry::new();

        for name in ["alice", "bob", "carol"] {
            registry
                .try_add_participant("42", name, true, true, conn(), |_| {})
                .await
                .unwrap();
        }

        let names: Vec<_> = registry
            .roster("42")
            .await
            .iter()
            .map(|p| p.username.clone())
            .collect();
        assert_eq!(names, ["alice", "bob", "carol"]);

        let seqs: Vec<_> = registry.roster("42").await.iter().map(|p| p.join_seq).collect();
        assert_eq!(seqs, [0, 1, 2]);
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected_without_mutation() {
        let registry = RoomRegistry::new();
        registry
            .try_add_participant("42", "alice", true, true, conn(), |_| {})
            .await
            .unwrap();

        let err = registry
            .try_add_participant("42", "alice", false, false, conn(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NameConflict { .. }));

        let roster = registry.roster("42").await;
        assert_eq!(roster.len(), 1);
        assert!(roster[0].audio, "original participant untouched");
    }

    #[tokio::test]
    async fn same_name_allowed_in_different_rooms() {
        let registry = RoomRegistry::new();
        registry
            .try_add_participant("42", "alice", true, true, conn(), |_| {})
            .await
            .unwrap();
        registry
            .try_add_participant("43", "alice", true, true, conn(), |_| {})
            .await
            .unwrap();

        assert_eq!(registry.roster("42").await.len(), 1);
        assert_eq!(registry.roster("43").await.len(), 1);
    }

    #[tokio::test]
    async fn empty_room_is_deleted_not_left_behind() {
        let registry = RoomRegistry::new();
        registry
            .try_add_participant("42", "alice", true, true, conn(), |_| {})
            .await
            .unwrap();
        assert_eq!(registry.room_count().await, 1);

        let remaining = registry.remove_participant("42", "alice", |_| {}).await;
        assert!(remaining.is_empty());
        assert_eq!(registry.room_count().await, 0);
        assert!(registry.roster("42").await.is_empty());
    }

    #[tokio::test]
    async fn rejoin_after_teardown_starts_a_fresh_room() {
        let registry = RoomRegistry::new();
        registry
            .try_add_participant("42", "alice", true, true, conn(), |_| {})
            .await
            .unwrap();
        registry.remove_participant("42", "alice", |_| {}).await;

        let roster = registry
            .try_add_participant("42", "alice", true, true, conn(), |_| {})
            .await
            .unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].join_seq, 0, "sequence restarts with the room");
    }

    #[tokio::test]
    async fn leave_sequence_preserves_remaining_order() {
        let registry = RoomRegistry::new();
        for name in ["alice", "bob", "carol"] {
            registry
                .try_add_participant("42", name, true, true, conn(), |_| {})
                .await
                .unwrap();
        }

        let remaining = registry.remove_participant("42", "bob", |_| {}).await;
        let names: Vec<_> = remaining.iter().map(|p| p.username.clone()).collect();
        assert_eq!(names, ["alice", "carol"]);

        let names: Vec<_> = registry
            .roster("42")
            .await
            .iter()
            .map(|p| p.username.clone())
            .collect();
        assert_eq!(names, ["alice", "carol"]);
    }

    #[tokio::test]
    async fn removing_unknown_participant_is_a_noop() {
        let registry = RoomRegistry::new();
        registry
            .try_add_participant("42", "alice", true, true, conn(), |_| {})
            .await
            .unwrap();

        let roster = registry.remove_participant("42", "ghost", |_| {}).await;
        assert_eq!(roster.len(), 1);
        assert!(registry.remove_participant("nowhere", "ghost", |_| {}).await.is_empty());
    }
}
