//! Application state

use crate::config::Config;
use std::sync::Arc;
use wopi_host::{LocalFileStore, ProtocolEngine};

/// Shared state for the non-WOPI routes
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub engine: Arc<ProtocolEngine>,
    pub store: Arc<LocalFileStore>,
}

impl AppState {
    pub fn new(config: Config, engine: Arc<ProtocolEngine>, store: Arc<LocalFileStore>) -> Self {
        Self {
            config,
            engine,
            store,
        }
    }
}
