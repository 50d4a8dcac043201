use std::sync::Arc;

use crate::hub::SignalingHub;

#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3001".to_string());

        Ok(Config { bind_address })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub hub: Arc<SignalingHub>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            hub: Arc::new(SignalingHub::new()),
        }
    }
}
