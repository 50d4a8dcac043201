//! Headless meshcall participant
//!
//! Joins a room, negotiates links with every other participant, and logs
//! session updates until interrupted. Useful for soaking the hub and for
//! standing in as extra participants during development.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meshcall_client::{
    RtcConfig, SampleMediaSource, SessionConfig, SessionController, SessionUpdate, SignalChannel,
    WebRtcEngine,
};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meshcall=debug,meshcall_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let url = env_or("SIGNAL_URL", "ws://127.0.0.1:3001/ws");
    let config = SessionConfig {
        username: env_or("MESHCALL_USERNAME", "meshcall-bot"),
        meeting_id: env_or("MESHCALL_MEETING", "dev"),
        audio: env_or("MESHCALL_AUDIO", "true") == "true",
        video: env_or("MESHCALL_VIDEO", "true") == "true",
    };

    tracing::info!(
        "joining meeting {} as {} via {}",
        config.meeting_id,
        config.username,
        url
    );

    let engine = Arc::new(WebRtcEngine::new(RtcConfig::load())?);
    let media = Arc::new(SampleMediaSource);

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();

    let (controller, handle) =
        SessionController::new(config, media, engine, outbound_tx, updates_tx);

    let _signal = SignalChannel::connect(&url, handle.clone(), outbound_rx).await?;
    let session = tokio::spawn(controller.run());

    let updates = tokio::spawn(async move {
        while let Some(update) = updates_rx.recv().await {
            match update {
                SessionUpdate::Joined { roster } => {
                    let names: Vec<&str> = roster.iter().map(|u| u.username.as_str()).collect();
                    tracing::info!("joined; roster: {:?}", names);
                }
                SessionUpdate::JoinRejected { msg } => {
                    tracing::error!("join rejected: {}", msg);
                }
                SessionUpdate::RosterChanged { roster } => {
                    let names: Vec<&str> = roster.iter().map(|u| u.username.as_str()).collect();
                    tracing::info!("roster changed: {:?}", names);
                }
                SessionUpdate::MediaFailed { error } => {
                    tracing::error!("media failed: {}", error);
                }
                SessionUpdate::PeerMedia { remote, track } => {
                    tracing::info!("media from {}: {} ({:?})", remote, track.id, track.kind);
                }
                SessionUpdate::PeerLinkState { remote, state } => {
                    tracing::info!("link to {} is {:?}", remote, state);
                }
                SessionUpdate::LinkDegraded { remote } => {
                    tracing::warn!("link to {} degraded", remote);
                }
                SessionUpdate::PeerLeft { remote } => {
                    tracing::info!("{} left", remote);
                }
                SessionUpdate::Ended => {
                    tracing::info!("session ended");
                    break;
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupted; ending call");
    handle.end_call();

    let _ = session.await;
    let _ = updates.await;
    Ok(())
}
