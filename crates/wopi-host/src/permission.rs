//! Per-request capability flags

use std::collections::HashMap;

use crate::auth::AccessGrant;

/// Request-scoped permission inputs. Rebuilt on every request, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionContext {
    pub user_id: String,
    pub user_name: String,
    /// Write access granted by the access token
    pub token_can_write: bool,
    /// `readonly` hint on the request
    pub read_only: bool,
    /// `noprint` hint on the request
    pub no_print: bool,
}

impl PermissionContext {
    pub fn from_grant(grant: &AccessGrant) -> Self {
        Self {
            user_id: grant.user_id.clone(),
            user_name: grant.user_name.clone(),
            token_can_write: grant.can_write,
            read_only: false,
            no_print: false,
        }
    }

    /// Apply `readonly` / `noprint` hints from the query string
    pub fn with_hints(mut self, params: &HashMap<String, String>) -> Self {
        self.read_only = params.get("readonly").is_some_and(|v| is_truthy(v));
        self.no_print = params.get("noprint").is_some_and(|v| is_truthy(v));
        self
    }
}

// A bare `?readonly` counts as set.
fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "1" | "true" | "yes" | "on"
    )
}

/// Resolved capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub can_edit: bool,
    pub can_print: bool,
}

/// Computes capabilities from a [`PermissionContext`]
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionResolver;

impl PermissionResolver {
    pub fn resolve(&self, ctx: &PermissionContext) -> Capabilities {
        Capabilities {
            can_edit: ctx.token_can_write && !ctx.read_only,
            can_print: !ctx.no_print,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(can_write: bool) -> AccessGrant {
        AccessGrant {
            user_id: "u1".to_string(),
            user_name: "User One".to_string(),
            can_write,
        }
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_capabilities() {
        let ctx = PermissionContext::from_grant(&grant(true));
        let caps = PermissionResolver.resolve(&ctx);
        assert!(caps.can_edit);
        assert!(caps.can_print);
    }

    #[test]
    fn test_readonly_hint_disables_edit() {
        let ctx = PermissionContext::from_grant(&grant(true)).with_hints(&params(&[("readonly", "1")]));
        assert!(!PermissionResolver.resolve(&ctx).can_edit);

        let ctx = PermissionContext::from_grant(&grant(true)).with_hints(&params(&[("readonly", "")]));
        assert!(!PermissionResolver.resolve(&ctx).can_edit);

        let ctx =
            PermissionContext::from_grant(&grant(true)).with_hints(&params(&[("readonly", "false")]));
        assert!(PermissionResolver.resolve(&ctx).can_edit);
    }

    #[test]
    fn test_read_only_grant_cannot_edit() {
        let ctx = PermissionContext::from_grant(&grant(false));
        assert!(!PermissionResolver.resolve(&ctx).can_edit);
    }

    #[test]
    fn test_noprint_hint() {
        let ctx = PermissionContext::from_grant(&grant(true)).with_hints(&params(&[("noprint", "true")]));
        let caps = PermissionResolver.resolve(&ctx);
        assert!(caps.can_edit);
        assert!(!caps.can_print);
    }
}
