//! Access token middleware

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use tracing::debug;

use super::WopiState;
use crate::permission::PermissionContext;

/// Extract the access token from `?access_token=` or `Authorization: Bearer`
fn access_token(params: &HashMap<String, String>, request: &Request<Body>) -> Option<String> {
    if let Some(token) = params.get("access_token") {
        return Some(token.clone());
    }
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
}

/// Resolve the caller's [`PermissionContext`] before any WOPI operation runs
pub async fn access_token_middleware(
    State(state): State<WopiState>,
    Query(params): Query<HashMap<String, String>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = access_token(&params, &request);
    let grant = match state.validator.validate(token.as_deref()).await {
        Ok(grant) => grant,
        Err(e) => {
            debug!("Rejected request to {}: {}", request.uri().path(), e);
            return e.into_response();
        }
    };

    let ctx = PermissionContext::from_grant(&grant).with_hints(&params);
    request.extensions_mut().insert(ctx);
    next.run(request).await
}
