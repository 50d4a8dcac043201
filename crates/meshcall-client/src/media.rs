//! Local media capability surface
//!
//! Camera/microphone acquisition is an external collaborator: given the
//! audio/video enablement flags it yields track handles or fails. The
//! controller treats every handle as opaque; only the transport backend
//! looks inside (via `as_any`).

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media acquisition failed: {0}")]
    Acquisition(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// One local track handle.
pub trait LocalTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    /// Backend downcast hook.
    fn as_any(&self) -> &dyn Any;
}

/// The set of local tracks acquired for a session.
#[derive(Clone, Default)]
pub struct LocalMedia {
    pub tracks: Vec<Arc<dyn LocalTrack>>,
}

impl LocalMedia {
    pub fn new(tracks: Vec<Arc<dyn LocalTrack>>) -> Self {
        Self { tracks }
    }
}

impl fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMedia")
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// A remote participant's track as surfaced to the UI collaborator.
#[derive(Clone)]
pub struct RemoteMedia {
    pub id: String,
    pub kind: TrackKind,
    pub handle: Arc<dyn Any + Send + Sync>,
}

impl fmt::Debug for RemoteMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMedia")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self, audio: bool, video: bool) -> Result<LocalMedia, MediaError>;
}
