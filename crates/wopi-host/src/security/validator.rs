//! Validation of collaborator-supplied identifiers

use crate::error::{WopiError, WopiResult};
use regex::Regex;
use std::sync::LazyLock;

/// Maximum length of a file id, leaving room for the extension and temp
/// suffix within a 255-byte file name
pub const MAX_FILE_ID_LEN: usize = 200;

/// Maximum length of a lock token, as allowed by WOPI clients
pub const MAX_LOCK_TOKEN_LEN: usize = 1024;

/// Valid file id pattern (alphanumeric, underscore, hyphen, dot)
static VALID_FILE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("static regex"));

/// Validate a file id before it is used to address storage.
///
/// File ids end up as path segments in the local backend, so anything that
/// could escape the documents directory is rejected.
///
/// # Returns
/// * `Ok(())` if the id is usable
/// * `Err(WopiError::InvalidRequest)` otherwise
pub fn validate_file_id(id: &str) -> WopiResult<()> {
    if id.is_empty() {
        return Err(WopiError::InvalidRequest("File id is empty".to_string()));
    }

    if id.len() > MAX_FILE_ID_LEN {
        return Err(WopiError::InvalidRequest(format!(
            "File id exceeds {} characters",
            MAX_FILE_ID_LEN
        )));
    }

    // Check for path traversal sequences
    if id.contains("..") || id.starts_with('.') {
        return Err(WopiError::InvalidRequest(format!("Invalid file id: {}", id)));
    }

    if !VALID_FILE_ID.is_match(id) {
        return Err(WopiError::InvalidRequest(format!("Invalid file id: {}", id)));
    }

    Ok(())
}

/// Validate an editor-issued lock token. The host never interprets the
/// token, it only needs to be storable and echoable in a header.
pub fn validate_lock_token(token: &str) -> WopiResult<()> {
    if token.is_empty() {
        return Err(WopiError::InvalidRequest("Lock token is empty".to_string()));
    }

    if token.len() > MAX_LOCK_TOKEN_LEN {
        return Err(WopiError::InvalidRequest(format!(
            "Lock token exceeds {} characters",
            MAX_LOCK_TOKEN_LEN
        )));
    }

    if token.chars().any(|c| c.is_control()) {
        return Err(WopiError::InvalidRequest(
            "Lock token contains control characters".to_string(),
        ));
    }

    Ok(())
}
