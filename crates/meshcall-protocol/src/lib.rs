//! Meshcall signaling protocol
//!
//! The wire unit is the [`Envelope`]: `{ type, data, code, msg }` carried as
//! JSON text over any ordered, reliable, full-duplex channel. Session
//! descriptions and ICE candidates are opaque JSON values end to end; only
//! the transport backend on the client interprets them.

mod envelope;
mod types;

pub use envelope::{Envelope, Payload};
pub use types::{
    AnswerData, CandidateData, OfferData, RoomUser, StartCallData, UsersData, CODE_NAME_TAKEN,
    CODE_OK,
};
