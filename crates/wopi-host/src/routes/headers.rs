//! `X-WOPI-*` headers and the override verb

use axum::http::{HeaderMap, HeaderName};
use std::str::FromStr;

use crate::error::{WopiError, WopiResult};

pub const X_WOPI_OVERRIDE: HeaderName = HeaderName::from_static("x-wopi-override");
pub const X_WOPI_LOCK: HeaderName = HeaderName::from_static("x-wopi-lock");
pub const X_WOPI_OLD_LOCK: HeaderName = HeaderName::from_static("x-wopi-oldlock");
pub const X_WOPI_ITEM_VERSION: HeaderName = HeaderName::from_static("x-wopi-itemversion");
pub const X_WOPI_LOCK_FAILURE_REASON: HeaderName =
    HeaderName::from_static("x-wopi-lockfailurereason");

/// Operation selected by `X-WOPI-Override`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WopiOverride {
    Put,
    Lock,
    Unlock,
    RefreshLock,
    UnlockAndRelock,
    GetLock,
}

impl FromStr for WopiOverride {
    type Err = WopiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PUT" => Ok(WopiOverride::Put),
            "LOCK" => Ok(WopiOverride::Lock),
            "UNLOCK" => Ok(WopiOverride::Unlock),
            "REFRESH_LOCK" => Ok(WopiOverride::RefreshLock),
            "UNLOCK_AND_RELOCK" => Ok(WopiOverride::UnlockAndRelock),
            "GET_LOCK" => Ok(WopiOverride::GetLock),
            other => Err(WopiError::Unsupported(other.to_string())),
        }
    }
}

/// Header value as a string, treating a blank value as absent
pub fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub fn require_header<'a>(headers: &'a HeaderMap, name: &HeaderName) -> WopiResult<&'a str> {
    header_str(headers, name)
        .ok_or_else(|| WopiError::InvalidRequest(format!("Missing {} header", name)))
}
