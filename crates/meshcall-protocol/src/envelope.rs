use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{
    AnswerData, CandidateData, OfferData, StartCallData, UsersData, CODE_NAME_TAKEN, CODE_OK,
};

/// The unit of signaling traffic. Immutable once sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub payload: Payload,
    pub code: u16,
    pub msg: String,
}

/// Type-discriminated envelope payload; `type` and `data` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum Payload {
    StartCall(StartCallData),
    Users(UsersData),
    Offer(OfferData),
    Answer(AnswerData),
    Candidate(CandidateData),
    /// Join-status report; carries no data. Sent with [`CODE_NAME_TAKEN`]
    /// when a join is rejected.
    CallState(Value),
}

impl Envelope {
    pub fn ok(payload: Payload, msg: impl Into<String>) -> Self {
        Self {
            payload,
            code: CODE_OK,
            msg: msg.into(),
        }
    }

    pub fn name_taken(msg: impl Into<String>) -> Self {
        Self {
            payload: Payload::CallState(Value::Object(Default::default())),
            code: CODE_NAME_TAKEN,
            msg: msg.into(),
        }
    }
}
