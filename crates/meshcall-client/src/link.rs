//! Per-remote-participant negotiation state

use serde_json::Value;

use crate::transport::{LinkState, NegotiationError, PeerTransport};

/// Who produces the offer on this link. Fully determined by join order:
/// the earlier joiner initiates toward the later one, so two peers never
/// offer to each other simultaneously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Initiator,
    Responder,
}

/// Negotiation and transport state for one remote participant. Created at
/// most once per remote name per session; candidates received before the
/// remote description are queued here and flushed the moment it applies.
pub struct PeerLink {
    pub remote: String,
    pub role: PeerRole,
    pub transport: Box<dyn PeerTransport>,
    pub state: LinkState,
    /// Set after a negotiation apply failure; the link is left in place but
    /// no longer expected to progress.
    pub degraded: bool,
    pending_candidates: Vec<Value>,
    remote_description_set: bool,
}

impl PeerLink {
    pub fn new(remote: impl Into<String>, role: PeerRole, transport: Box<dyn PeerTransport>) -> Self {
        Self {
            remote: remote.into(),
            role,
            transport,
            state: LinkState::New,
            degraded: false,
            pending_candidates: Vec::new(),
            remote_description_set: false,
        }
    }

    /// Apply the remote description, then flush every queued candidate in
    /// arrival order.
    pub async fn apply_remote_description(&mut self, description: Value) -> Result<(), NegotiationError> {
        self.transport.set_remote_description(description).await?;
        self.remote_description_set = true;

        for candidate in self.pending_candidates.drain(..) {
            self.transport.add_candidate(candidate).await?;
        }

        Ok(())
    }

    /// Apply a candidate immediately if the remote description is in place,
    /// otherwise queue it.
    pub async fn add_candidate(&mut self, candidate: Value) -> Result<(), NegotiationError> {
        if self.remote_description_set {
            self.transport.add_candidate(candidate).await
        } else {
            self.pending_candidates.push(candidate);
            Ok(())
        }
    }

    /// Release the transport. Errors are logged, not propagated: teardown
    /// runs on roster removal and session end, where there is nobody left
    /// to report to.
    pub async fn close(&mut self) {
        if let Err(e) = self.transport.close().await {
            tracing::warn!("error closing link to {}: {}", self.remote, e);
        }
        self.state = LinkState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DataChannel;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingTransport {
        ops: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl PeerTransport for RecordingTransport {
        async fn create_offer(&self) -> Result<Value, NegotiationError> {
            Ok(json!({ "type": "offer" }))
        }

        async fn create_answer(&self) -> Result<Value, NegotiationError> {
            Ok(json!({ "type": "answer" }))
        }

        async fn set_local_description(&self, _description: Value) -> Result<(), NegotiationError> {
            self.ops.lock().unwrap().push("set_local".into());
            Ok(())
        }

        async fn set_remote_description(&self, _description: Value) -> Result<(), NegotiationError> {
            self.ops.lock().unwrap().push("set_remote".into());
            Ok(())
        }

        async fn add_track(
            &self,
            _track: &dyn crate::media::LocalTrack,
        ) -> Result<(), NegotiationError> {
            self.ops.lock().unwrap().push("add_track".into());
            Ok(())
        }

        async fn add_candidate(&self, candidate: Value) -> Result<(), NegotiationError> {
            self.ops
                .lock()
                .unwrap()
                .push(format!("candidate:{}", candidate["n"]));
            Ok(())
        }

        async fn open_data_channel(
            &self,
            _label: &str,
        ) -> Result<Box<dyn DataChannel>, NegotiationError> {
            unimplemented!("not used by link tests")
        }

        async fn close(&self) -> Result<(), NegotiationError> {
            self.ops.lock().unwrap().push("close".into());
            Ok(())
        }
    }

    #[tokio::test]
    async fn candidates_are_queued_until_remote_description_applies() {
        let ops = Arc::new(Mutex::new(Vec::new()));
        let transport = Box::new(RecordingTransport { ops: ops.clone() });
        let mut link = PeerLink::new("bob", PeerRole::Responder, transport);

        link.add_candidate(json!({ "n": 1 })).await.unwrap();
        link.add_candidate(json!({ "n": 2 })).await.unwrap();
        assert!(ops.lock().unwrap().is_empty(), "nothing applied early");

        link.apply_remote_description(json!({ "type": "offer" }))
            .await
            .unwrap();

        assert_eq!(
            *ops.lock().unwrap(),
            ["set_remote", "candidate:1", "candidate:2"]
        );
    }

    #[tokio::test]
    async fn candidates_apply_immediately_once_description_is_set() {
        let ops = Arc::new(Mutex::new(Vec::new()));
        let transport = Box::new(RecordingTransport { ops: ops.clone() });
        let mut link = PeerLink::new("bob", PeerRole::Initiator, transport);

        link.apply_remote_description(json!({ "type": "answer" }))
            .await
            .unwrap();
        link.add_candidate(json!({ "n": 1 })).await.unwrap();

        assert_eq!(*ops.lock().unwrap(), ["set_remote", "candidate:1"]);
    }

    #[tokio::test]
    async fn queued_candidates_flush_exactly_once() {
        let ops = Arc::new(Mutex::new(Vec::new()));
        let transport = Box::new(RecordingTransport { ops: ops.clone() });
        let mut link = PeerLink::new("bob", PeerRole::Responder, transport);

        link.add_candidate(json!({ "n": 1 })).await.unwrap();
        link.apply_remote_description(json!({ "type": "offer" }))
            .await
            .unwrap();
        // A second apply (renegotiation) must not replay the old candidate.
        link.apply_remote_description(json!({ "type": "offer" }))
            .await
            .unwrap();

        let applied = ops
            .lock()
            .unwrap()
            .iter()
            .filter(|op| op.starts_with("candidate"))
            .count();
        assert_eq!(applied, 1);
    }
}
