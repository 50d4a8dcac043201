//! Peer transport capability surface
//!
//! The controller drives connectivity through these traits only; the actual
//! ICE/DTLS/SRTP machinery lives behind them (see `rtc` for the webrtc-rs
//! backend). Session descriptions and candidates stay opaque JSON values.
//! Transport callbacks are delivered as [`LinkEvent`]s into the session's
//! single event queue, never invoked re-entrantly against controller state.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::media::{LocalTrack, RemoteMedia};

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("failed to open peer link to {remote}: {reason}")]
    LinkSetup { remote: String, reason: String },

    #[error("{op} failed: {reason}")]
    Apply { op: &'static str, reason: String },
}

impl NegotiationError {
    pub fn apply(op: &'static str, reason: impl ToString) -> Self {
        Self::Apply {
            op,
            reason: reason.to_string(),
        }
    }
}

/// Connection state of one peer link, mirrored from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchronous transport callback, tagged with the remote display name the
/// link was opened for.
#[derive(Debug)]
pub enum LinkEvent {
    LocalCandidate { remote: String, candidate: Value },
    RemoteTrack { remote: String, track: RemoteMedia },
    StateChanged { remote: String, state: LinkState },
}

/// Per-link negotiation operations.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> Result<Value, NegotiationError>;
    async fn create_answer(&self) -> Result<Value, NegotiationError>;
    async fn set_local_description(&self, description: Value) -> Result<(), NegotiationError>;
    async fn set_remote_description(&self, description: Value) -> Result<(), NegotiationError>;
    async fn add_track(&self, track: &dyn LocalTrack) -> Result<(), NegotiationError>;
    async fn add_candidate(&self, candidate: Value) -> Result<(), NegotiationError>;
    /// Open an auxiliary bidirectional message channel on this link,
    /// independent of the media path.
    async fn open_data_channel(&self, label: &str)
        -> Result<Box<dyn DataChannel>, NegotiationError>;
    async fn close(&self) -> Result<(), NegotiationError>;
}

#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;
    async fn send_text(&self, text: &str) -> Result<(), NegotiationError>;
    async fn close(&self) -> Result<(), NegotiationError>;
}

/// Creates one transport per remote participant, wired to report its
/// callbacks into `events`.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open_link(
        &self,
        remote: &str,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Box<dyn PeerTransport>, NegotiationError>;
}
