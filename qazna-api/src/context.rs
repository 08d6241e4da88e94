//! Explicit per-request context. Identity and correlation data travel
//! through handler signatures instead of untyped attribute bags.

use axum::{extract::FromRequestParts, http::request::Parts};
use qazna_core::middleware::request_id::RequestId;

/// The authenticated caller attached by the auth middleware.
#[derive(Debug, Clone, Default)]
pub struct Actor {
    pub user_id: String,
    pub org_id: Option<String>,
    pub roles: Vec<String>,
    /// Permission keys embedded in the access token, if any.
    pub token_permissions: Vec<String>,
}

impl Actor {
    pub fn has_role(&self, role: &str) -> bool {
        let role = role.trim().to_ascii_lowercase();
        !role.is_empty() && self.roles.iter().any(|r| r == &role)
    }
}

/// Request-scoped record handed to services that need correlation or
/// identity: the audit log and the remote ledger metadata relay.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: Option<String>,
    pub actor: Option<Actor>,
}

impl RequestContext {
    pub fn user_id(&self) -> Option<&str> {
        self.actor.as_ref().map(|a| a.user_id.as_str())
    }

    pub fn org_id(&self) -> Option<&str> {
        self.actor.as_ref().and_then(|a| a.org_id.as_deref())
    }

    pub fn roles(&self) -> &[String] {
        self.actor.as_ref().map(|a| a.roles.as_slice()).unwrap_or(&[])
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(RequestContext {
            request_id: parts.extensions.get::<RequestId>().map(|rid| rid.0.clone()),
            actor: parts.extensions.get::<Actor>().cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_check_is_normalized() {
        let actor = Actor {
            user_id: "u1".into(),
            org_id: None,
            roles: vec!["admin".into(), "auditor".into()],
            token_permissions: vec![],
        };
        assert!(actor.has_role("ADMIN "));
        assert!(actor.has_role("auditor"));
        assert!(!actor.has_role("operator"));
        assert!(!actor.has_role(""));
    }
}
