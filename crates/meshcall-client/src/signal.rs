//! WebSocket signaling channel
//!
//! Connects to the hub, forwards envelopes from the session's outbound
//! queue, and delivers decoded inbound envelopes into the session. Relay
//! order is preserved in both directions: one writer task, one reader task.

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use meshcall_protocol::Envelope;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::controller::SessionHandle;

pub struct SignalChannel;

impl SignalChannel {
    /// Connect to the hub and wire both directions: envelopes pulled from
    /// `outbound` go to the hub in order, and every inbound envelope is
    /// delivered to `session`. When the stream ends the session is
    /// notified via `signal_closed`.
    pub async fn connect(
        url: &str,
        session: SessionHandle,
        mut outbound: mpsc::UnboundedReceiver<Envelope>,
    ) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        tracing::info!("connected to signaling hub at {}", url);

        let (mut write, mut read) = ws_stream.split();

        tokio::spawn(async move {
            while let Some(envelope) = outbound.recv().await {
                let json = match serde_json::to_string(&envelope) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!("failed to serialize envelope: {}", e);
                        continue;
                    }
                };

                if write.send(Message::Text(json.into())).await.is_err() {
                    tracing::error!("failed to send signaling message");
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(result) = read.next().await {
                match result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Envelope>(&text) {
                        Ok(envelope) => session.deliver(envelope),
                        Err(e) => {
                            tracing::warn!("ignoring undecodable signaling message: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("signaling connection closed by hub");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("signaling connection error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            session.signal_closed();
        });

        Ok(Self)
    }
}
