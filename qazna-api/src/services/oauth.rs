//! OAuth 2.0 Authorization-Code flow with PKCE.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use qazna_core::error::AppError;
use qazna_core::ids;

use crate::models::{AuthCode, CodeChallengeMethod, OAuthClient};
use crate::services::tokens::{dedupe_roles, IssuedAccess, TokenService};

pub const AUTH_CODE_TTL_MINUTES: i64 = 5;

/// Client registry and single-use code storage.
#[async_trait]
pub trait OAuthStore: Send + Sync {
    async fn find_client(&self, id: &str) -> Result<Option<OAuthClient>, AppError>;

    async fn insert_code(&self, code: &AuthCode) -> Result<(), AppError>;

    async fn find_code(&self, code: &str, client_id: &str) -> Result<Option<AuthCode>, AppError>;

    /// Atomically stamp `consumed_at`; returns false when the code was
    /// already consumed by a concurrent exchange.
    async fn mark_consumed(
        &self,
        code: &str,
        client_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError>;
}

pub struct OAuthService {
    store: Arc<dyn OAuthStore>,
    tokens: Arc<TokenService>,
    code_ttl: Duration,
}

impl OAuthService {
    pub fn new(store: Arc<dyn OAuthStore>, tokens: Arc<TokenService>) -> Self {
        Self { store, tokens, code_ttl: Duration::minutes(AUTH_CODE_TTL_MINUTES) }
    }

    /// Validate the client and persist a single-use code bound to the PKCE
    /// challenge.
    #[allow(clippy::too_many_arguments)]
    pub async fn issue_auth_code(
        &self,
        client_id: &str,
        redirect_uri: &str,
        code_challenge: &str,
        method: &str,
        user_id: &str,
        roles: &[String],
    ) -> Result<AuthCode, AppError> {
        let client_id = client_id.trim();
        let redirect_uri = redirect_uri.trim();
        let code_challenge = code_challenge.trim();
        let user_id = user_id.trim();
        if client_id.is_empty() || redirect_uri.is_empty() || code_challenge.is_empty() || user_id.is_empty()
        {
            return Err(AppError::bad_request(
                "client_id, redirect_uri, code_challenge and user are required",
            ));
        }
        let method = CodeChallengeMethod::parse(method)
            .ok_or_else(|| AppError::bad_request("code_challenge_method must be S256 or PLAIN"))?;

        let client = self
            .store
            .find_client(client_id)
            .await?
            .ok_or_else(|| AppError::bad_request("unknown client"))?;
        if client.redirect_uri != redirect_uri {
            return Err(AppError::bad_request("redirect_uri mismatch"));
        }

        let code = AuthCode {
            code: ids::new_id(),
            client_id: client.id,
            code_challenge: code_challenge.to_string(),
            code_challenge_method: method,
            redirect_uri: redirect_uri.to_string(),
            user_id: user_id.to_string(),
            roles: dedupe_roles(roles),
            expires_at: Utc::now() + self.code_ttl,
            consumed_at: None,
        };
        self.store.insert_code(&code).await?;
        Ok(code)
    }

    /// Exchange a code for an access token. The code is consumed
    /// atomically; a second exchange fails.
    pub async fn exchange_auth_code(
        &self,
        client_id: &str,
        client_secret: &str,
        code: &str,
        code_verifier: &str,
    ) -> Result<IssuedAccess, AppError> {
        let client_id = client_id.trim();
        let code = code.trim();
        if client_id.is_empty() || code.is_empty() {
            return Err(AppError::bad_request("client_id and code are required"));
        }

        let client = self
            .store
            .find_client(client_id)
            .await?
            .ok_or_else(|| AppError::bad_request("unknown client"))?;
        if !constant_time_eq(&client.secret, client_secret) {
            return Err(AppError::bad_request("invalid client credentials"));
        }

        let record = self
            .store
            .find_code(code, client_id)
            .await?
            .ok_or_else(|| AppError::bad_request("invalid code"))?;
        if record.consumed_at.is_some() {
            return Err(AppError::bad_request("code already used"));
        }
        let now = Utc::now();
        if now > record.expires_at {
            return Err(AppError::bad_request("code expired"));
        }
        if !verify_challenge(record.code_challenge_method, &record.code_challenge, code_verifier) {
            return Err(AppError::bad_request("invalid code_verifier"));
        }

        if !self.store.mark_consumed(code, client_id, now).await? {
            return Err(AppError::bad_request("code already used"));
        }

        self.tokens.issue_for(&record.user_id, &record.roles, None, vec![]).await
    }
}

/// PKCE verification: `base64url(sha256(verifier))` for S256, byte equality
/// for PLAIN. Both compare in constant time.
pub fn verify_challenge(method: CodeChallengeMethod, challenge: &str, verifier: &str) -> bool {
    if verifier.is_empty() {
        return false;
    }
    match method {
        CodeChallengeMethod::S256 => {
            let computed = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
            constant_time_eq(challenge, &computed)
        }
        CodeChallengeMethod::Plain => constant_time_eq(challenge, verifier),
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{MemoryKeyStore, MemoryOAuthStore, MemoryRbacStore, MemoryRefreshTokenStore};
    use crate::services::keys::KeyManager;
    use crate::services::tokens::{DEFAULT_ISSUER, TokenService};

    fn service() -> OAuthService {
        let tokens = Arc::new(TokenService::new(
            Arc::new(KeyManager::new(Arc::new(MemoryKeyStore::new()))),
            Arc::new(MemoryRefreshTokenStore::new()),
            Arc::new(MemoryRbacStore::new()),
            DEFAULT_ISSUER,
            Duration::minutes(15),
            Duration::days(14),
        ));
        OAuthService::new(Arc::new(MemoryOAuthStore::with_demo_client()), tokens)
    }

    fn s256(verifier: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    }

    #[test]
    fn challenge_verification() {
        let challenge = s256("sample-verifier");
        assert!(verify_challenge(CodeChallengeMethod::S256, &challenge, "sample-verifier"));
        assert!(!verify_challenge(CodeChallengeMethod::S256, &challenge, "other-verifier"));
        assert!(verify_challenge(CodeChallengeMethod::Plain, "plain-value", "plain-value"));
        assert!(!verify_challenge(CodeChallengeMethod::Plain, "plain-value", "else"));
        assert!(!verify_challenge(CodeChallengeMethod::Plain, "plain-value", ""));
    }

    #[tokio::test]
    async fn full_pkce_flow() {
        let oauth = service();
        let challenge = s256("sample-verifier");

        let code = oauth
            .issue_auth_code(
                "demo-client",
                "http://localhost/callback",
                &challenge,
                "S256",
                "demo-user",
                &["admin".to_string()],
            )
            .await
            .unwrap();

        let issued = oauth
            .exchange_auth_code("demo-client", "demo-secret", &code.code, "sample-verifier")
            .await
            .unwrap();
        assert!(!issued.token.is_empty());
        assert!(issued.expires_at > Utc::now());

        // Single use.
        let err = oauth
            .exchange_auth_code("demo-client", "demo-secret", &code.code, "sample-verifier")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn issue_rejects_bad_client_or_redirect() {
        let oauth = service();
        let challenge = s256("v");
        assert!(oauth
            .issue_auth_code("ghost", "http://localhost/callback", &challenge, "S256", "u", &[])
            .await
            .is_err());
        assert!(oauth
            .issue_auth_code("demo-client", "http://elsewhere/cb", &challenge, "S256", "u", &[])
            .await
            .is_err());
        assert!(oauth
            .issue_auth_code("demo-client", "http://localhost/callback", &challenge, "s256", "u", &[])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn exchange_rejects_bad_secret_and_verifier() {
        let oauth = service();
        let challenge = s256("sample-verifier");
        let code = oauth
            .issue_auth_code(
                "demo-client",
                "http://localhost/callback",
                &challenge,
                "S256",
                "demo-user",
                &[],
            )
            .await
            .unwrap();

        assert!(oauth
            .exchange_auth_code("demo-client", "wrong-secret", &code.code, "sample-verifier")
            .await
            .is_err());
        assert!(oauth
            .exchange_auth_code("demo-client", "demo-secret", &code.code, "wrong-verifier")
            .await
            .is_err());
        // The failed verifier attempts must not have consumed the code.
        assert!(oauth
            .exchange_auth_code("demo-client", "demo-secret", &code.code, "sample-verifier")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn expired_code_is_rejected() {
        let oauth = service();
        let challenge = s256("sample-verifier");
        let mut oauth_with_short_ttl = oauth;
        oauth_with_short_ttl.code_ttl = Duration::minutes(-1);

        let code = oauth_with_short_ttl
            .issue_auth_code(
                "demo-client",
                "http://localhost/callback",
                &challenge,
                "S256",
                "demo-user",
                &[],
            )
            .await
            .unwrap();
        let err = oauth_with_short_ttl
            .exchange_auth_code("demo-client", "demo-secret", &code.code, "sample-verifier")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expired"));
    }
}
