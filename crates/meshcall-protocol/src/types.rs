use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Join accepted / relay delivered.
pub const CODE_OK: u16 = 200;
/// Display name already taken in the target room.
pub const CODE_NAME_TAKEN: u16 = 300;

/// Join request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCallData {
    pub username: String,
    pub meeting_id: String,
    pub audio: bool,
    pub video: bool,
}

/// One roster entry as broadcast to the room. Connection handles never
/// appear here; this is the only projection of a participant that leaves
/// the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUser {
    pub username: String,
    pub audio: bool,
    pub video: bool,
}

/// Full room roster, ordered by join sequence. The last entry is always the
/// most recently joined participant, which is how a controller tells its own
/// join confirmation apart from someone else's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsersData {
    pub users: Vec<RoomUser>,
}

/// Relayed session offer. `connected_name` is the target participant,
/// `call_name` the sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferData {
    pub offer: Value,
    pub connected_name: String,
    pub call_name: String,
    pub meeting_id: String,
}

/// Relayed session answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerData {
    pub answer: Value,
    pub connected_name: String,
    pub call_name: String,
    pub meeting_id: String,
}

/// Relayed network-path candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateData {
    pub candidate: Value,
    pub connected_name: String,
    pub call_name: String,
    pub meeting_id: String,
}
