//! Meshcall client library
//!
//! This crate provides the participant side of a meshcall room: the session
//! negotiation controller, the capability traits it drives (media source,
//! peer transports), the webrtc-rs backend, and the WebSocket signaling
//! channel.

pub mod controller;
pub mod link;
pub mod media;
pub mod rtc;
pub mod signal;
pub mod transport;

pub use controller::{
    SessionConfig, SessionController, SessionEvent, SessionHandle, SessionPhase, SessionUpdate,
};
pub use link::{PeerLink, PeerRole};
pub use media::{LocalMedia, LocalTrack, MediaError, MediaSource, RemoteMedia, TrackKind};
pub use rtc::{RtcConfig, SampleMediaSource, WebRtcEngine};
pub use signal::SignalChannel;
pub use transport::{
    DataChannel, LinkEvent, LinkState, NegotiationError, PeerTransport, TransportFactory,
};
