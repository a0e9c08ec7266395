//! Access token validation
//!
//! The host does not issue access tokens. A collaborator maps the
//! `access_token` an editor presents to a user and write grant before any
//! WOPI operation runs.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::{WopiError, WopiResult};

/// Identity and write grant resolved from an access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub user_id: String,
    pub user_name: String,
    pub can_write: bool,
}

impl AccessGrant {
    /// The user every request maps to when anonymous access is enabled
    pub fn demo_user() -> Self {
        Self {
            user_id: "demo-user".to_string(),
            user_name: "Demo User".to_string(),
            can_write: true,
        }
    }
}

/// Maps an access token to an [`AccessGrant`]
#[async_trait]
pub trait AccessTokenValidator: Send + Sync {
    async fn validate(&self, token: Option<&str>) -> WopiResult<AccessGrant>;
}

/// Validates against a fixed token table, optionally falling back to the
/// demo user for missing or unknown tokens.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenValidator {
    tokens: HashMap<String, AccessGrant>,
    anonymous: Option<AccessGrant>,
}

impl StaticTokenValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept every request as the demo user
    pub fn anonymous() -> Self {
        Self::new().allow_anonymous(true)
    }

    pub fn allow_anonymous(mut self, allow: bool) -> Self {
        self.anonymous = allow.then(AccessGrant::demo_user);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>, grant: AccessGrant) -> Self {
        self.tokens.insert(token.into(), grant);
        self
    }

    /// Build from entries of the form `token:user_id[:ro]`
    pub fn from_entries<S: AsRef<str>>(entries: &[S]) -> WopiResult<Self> {
        let mut validator = Self::new();
        for entry in entries {
            let (token, grant) = parse_entry(entry.as_ref())?;
            validator.tokens.insert(token, grant);
        }
        Ok(validator)
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }
}

fn parse_entry(entry: &str) -> WopiResult<(String, AccessGrant)> {
    let parts: Vec<&str> = entry.trim().split(':').map(str::trim).collect();
    let invalid = || {
        WopiError::InvalidRequest(format!(
            "Invalid access token entry '{}', expected token:user_id[:ro]",
            entry
        ))
    };

    let (token, user_id, can_write) = match parts.as_slice() {
        [token, user_id] => (*token, *user_id, true),
        [token, user_id, "ro"] => (*token, *user_id, false),
        [token, user_id, "rw"] => (*token, *user_id, true),
        _ => return Err(invalid()),
    };
    if token.is_empty() || user_id.is_empty() {
        return Err(invalid());
    }

    Ok((
        token.to_string(),
        AccessGrant {
            user_id: user_id.to_string(),
            user_name: user_id.to_string(),
            can_write,
        },
    ))
}

#[async_trait]
impl AccessTokenValidator for StaticTokenValidator {
    async fn validate(&self, token: Option<&str>) -> WopiResult<AccessGrant> {
        let token = token.filter(|t| !t.is_empty());
        if let Some(grant) = token.and_then(|t| self.tokens.get(t)) {
            return Ok(grant.clone());
        }

        match (&self.anonymous, token) {
            (Some(anonymous), _) => Ok(anonymous.clone()),
            (None, None) => Err(WopiError::Unauthorized("Missing access token".to_string())),
            (None, Some(_)) => Err(WopiError::Unauthorized("Invalid access token".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_known_token() {
        let validator = StaticTokenValidator::from_entries(&["abc:alice", "xyz:bob:ro"]).unwrap();
        assert_eq!(validator.token_count(), 2);

        let alice = validator.validate(Some("abc")).await.unwrap();
        assert_eq!(alice.user_id, "alice");
        assert!(alice.can_write);

        let bob = validator.validate(Some("xyz")).await.unwrap();
        assert!(!bob.can_write);
    }

    #[tokio::test]
    async fn test_unknown_token_rejected_without_anonymous() {
        let validator = StaticTokenValidator::from_entries(&["abc:alice"]).unwrap();
        assert!(matches!(
            validator.validate(Some("nope")).await,
            Err(WopiError::Unauthorized(_))
        ));
        assert!(matches!(
            validator.validate(None).await,
            Err(WopiError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_anonymous_fallback() {
        let validator = StaticTokenValidator::anonymous().with_token(
            "abc",
            AccessGrant {
                user_id: "alice".into(),
                user_name: "Alice".into(),
                can_write: false,
            },
        );
        assert_eq!(validator.validate(None).await.unwrap(), AccessGrant::demo_user());
        assert_eq!(
            validator.validate(Some("whatever")).await.unwrap(),
            AccessGrant::demo_user()
        );
        assert_eq!(validator.validate(Some("abc")).await.unwrap().user_id, "alice");
    }

    #[test]
    fn test_bad_entries() {
        assert!(StaticTokenValidator::from_entries(&["justtoken"]).is_err());
        assert!(StaticTokenValidator::from_entries(&[":user"]).is_err());
        assert!(StaticTokenValidator::from_entries(&["t:u:admin"]).is_err());
    }
}
