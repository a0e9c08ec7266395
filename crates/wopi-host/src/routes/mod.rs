//! Routes module - WOPI HTTP endpoints

pub mod access;
pub mod files;
pub mod headers;

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use std::sync::Arc;

use crate::auth::AccessTokenValidator;
use crate::engine::ProtocolEngine;

/// Default upper bound for a PutFile body
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Shared state for the WOPI routes
#[derive(Clone)]
pub struct WopiState {
    pub engine: Arc<ProtocolEngine>,
    pub validator: Arc<dyn AccessTokenValidator>,
    pub max_upload_bytes: usize,
}

impl WopiState {
    pub fn new(engine: Arc<ProtocolEngine>, validator: Arc<dyn AccessTokenValidator>) -> Self {
        Self {
            engine,
            validator,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_max_upload_bytes(mut self, max: usize) -> Self {
        self.max_upload_bytes = max;
        self
    }
}

/// Build the `/wopi/files` router. Every route runs behind the access token
/// middleware.
pub fn configure(state: WopiState) -> Router {
    Router::new()
        .route(
            "/wopi/files/{file_id}",
            get(files::check_file_info).post(files::file_operation),
        )
        .route(
            "/wopi/files/{file_id}/contents",
            get(files::get_file).post(files::put_file).put(files::put_file),
        )
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            access::access_token_middleware,
        ))
        .with_state(state)
}
