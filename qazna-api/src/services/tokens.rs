//! Access-token issuance and refresh-token rotation.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, Header, Validation};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use qazna_core::error::AppError;
use qazna_core::ids;

use crate::models::{AccessClaims, RefreshTokenRecord, TokenPair, User, UserStatus};
use crate::services::keys::KeyManager;
use crate::services::password::verify_password;
use crate::services::rbac::RbacStore;

pub const DEFAULT_ISSUER: &str = "qazna";
pub const DEFAULT_ACCESS_TTL_MINUTES: i64 = 15;
pub const DEFAULT_REFRESH_TTL_DAYS: i64 = 14;

/// Permitted clock skew when validating `iat`, in seconds.
const IAT_SKEW_SECONDS: i64 = 5;

/// Refresh-token persistence. Rows are mutated under single-writer
/// discipline (`SELECT … FOR UPDATE` in the SQL backend).
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn create(&self, record: &RefreshTokenRecord) -> Result<(), AppError>;
    async fn find(&self, id: &str) -> Result<Option<RefreshTokenRecord>, AppError>;
    /// Atomically revoke one token. Returns false when the row was already
    /// revoked (or absent), so concurrent rotations cannot both win.
    async fn revoke(&self, id: &str) -> Result<bool, AppError>;
    async fn revoke_all_for_user(&self, user_id: &str) -> Result<(), AppError>;
}

/// A freshly minted access token.
#[derive(Debug, Clone)]
pub struct IssuedAccess {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenService {
    keys: Arc<KeyManager>,
    refresh: Arc<dyn RefreshTokenStore>,
    rbac: Arc<dyn RbacStore>,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(
        keys: Arc<KeyManager>,
        refresh: Arc<dyn RefreshTokenStore>,
        rbac: Arc<dyn RbacStore>,
        issuer: impl Into<String>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self { keys, refresh, rbac, issuer: issuer.into(), access_ttl, refresh_ttl }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Mint an access token for an arbitrary subject with literal roles.
    /// Development grant; no refresh token is produced.
    pub async fn issue_for(
        &self,
        user_id: &str,
        roles: &[String],
        org: Option<String>,
        permissions: Vec<String>,
    ) -> Result<IssuedAccess, AppError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(AppError::bad_request("user is required"));
        }
        self.sign_access(user_id, dedupe_roles(roles), org, permissions).await
    }

    /// Authenticate credentials and mint a fresh access/refresh pair.
    pub async fn issue_token_pair(&self, email: &str, password: &str) -> Result<(TokenPair, User), AppError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || password.is_empty() {
            return Err(AppError::unauthorized("invalid credentials"));
        }
        let user = self
            .rbac
            .find_user_by_email(&email)
            .await
            .map_err(|_| AppError::unauthorized("invalid credentials"))?;
        if user.status != UserStatus::Active {
            return Err(AppError::unauthorized("invalid credentials"));
        }
        verify_password(&user.password_hash, password)
            .map_err(|_| AppError::unauthorized("invalid credentials"))?;

        let pair = self.mint_pair(&user).await?;
        Ok((pair, user))
    }

    /// Rotate a refresh token: the presented row is revoked before a new
    /// pair is issued. Reuse of an already-revoked token revokes every
    /// token belonging to that user.
    pub async fn refresh_token_pair(&self, refresh_token: &str) -> Result<(TokenPair, User), AppError> {
        let (id, secret) = split_refresh_token(refresh_token)?;

        let record = self
            .refresh
            .find(id)
            .await?
            .ok_or_else(|| AppError::invalid_token("invalid refresh token"))?;

        if record.revoked {
            self.refresh.revoke_all_for_user(&record.user_id).await?;
            tracing::warn!(user_id = %record.user_id, "revoked refresh token reuse detected");
            return Err(AppError::invalid_token("invalid refresh token"));
        }
        if record.is_expired(Utc::now()) {
            return Err(AppError::invalid_token("invalid refresh token"));
        }
        if !hash_matches(&record.token_hash, secret) {
            self.refresh.revoke(&record.id).await?;
            return Err(AppError::invalid_token("invalid refresh token"));
        }

        let user = self
            .rbac
            .find_user(&record.user_id)
            .await
            .map_err(|_| AppError::invalid_token("invalid refresh token"))?;

        // Atomic claim: a concurrent rotation of the same token loses here
        // and is treated as reuse.
        if !self.refresh.revoke(&record.id).await? {
            self.refresh.revoke_all_for_user(&record.user_id).await?;
            return Err(AppError::invalid_token("invalid refresh token"));
        }
        let pair = self.mint_pair(&user).await?;
        Ok((pair, user))
    }

    async fn mint_pair(&self, user: &User) -> Result<TokenPair, AppError> {
        let roles = dedupe_roles(&self.rbac.user_role_names(&user.id).await?);
        let mut permissions = self.rbac.user_permissions(&user.id).await?;
        permissions.sort();
        permissions.dedup();

        let access = self
            .sign_access(&user.id, roles, Some(user.organization_id.clone()), permissions)
            .await?;

        let now = Utc::now();
        let mut secret_bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut secret_bytes);
        let secret = URL_SAFE_NO_PAD.encode(secret_bytes);
        let record = RefreshTokenRecord {
            id: ids::new_id(),
            user_id: user.id.clone(),
            token_hash: sha256_hex(&secret),
            expires_at: now + self.refresh_ttl,
            created_at: now,
            revoked: false,
        };
        self.refresh.create(&record).await?;

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: format!("{}.{}", record.id, secret),
            access_expires_at: access.expires_at,
            refresh_expires_at: record.expires_at,
        })
    }

    async fn sign_access(
        &self,
        user_id: &str,
        roles: Vec<String>,
        org: Option<String>,
        permissions: Vec<String>,
    ) -> Result<IssuedAccess, AppError> {
        let signer = self.keys.ensure_active().await?;
        let now = Utc::now();

        // The token never outlives the key that signed it.
        let remaining = signer.expires_at - now;
        let ttl = if remaining < self.access_ttl { remaining } else { self.access_ttl };
        if ttl <= Duration::zero() {
            return Err(AppError::Internal(anyhow::anyhow!("active signing key already expired")));
        }
        let expires_at = now + ttl;

        let claims = AccessClaims {
            iss: self.issuer.clone(),
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: ids::new_id(),
            roles,
            org: org.filter(|o| !o.is_empty()),
            permissions,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(signer.kid.clone());
        let token = encode(&header, &claims, &signer.encoding_key)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("sign token: {e}")))?;

        Ok(IssuedAccess { token, expires_at })
    }

    /// Verify signature and claims, returning normalized claims.
    pub async fn parse_and_validate(&self, token: &str) -> Result<AccessClaims, AppError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::invalid_token("invalid token"));
        }
        let header =
            decode_header(token).map_err(|_| AppError::invalid_token("invalid token"))?;
        if header.alg != Algorithm::RS256 {
            return Err(AppError::invalid_token("invalid token"));
        }
        let kid = header.kid.ok_or_else(|| AppError::invalid_token("invalid token"))?;
        let key = self
            .keys
            .decoding_key(&kid)
            .await
            .map_err(|_| AppError::invalid_token("invalid token"))?;
        self.validate_with_key(token, &key)
    }

    /// Cache-only validation for synchronous callers (the gRPC
    /// interceptor). Unknown `kid`s are rejected rather than fetched.
    pub fn verify_cached(&self, token: &str) -> Result<AccessClaims, AppError> {
        let header =
            decode_header(token).map_err(|_| AppError::invalid_token("invalid token"))?;
        if header.alg != Algorithm::RS256 {
            return Err(AppError::invalid_token("invalid token"));
        }
        let kid = header.kid.ok_or_else(|| AppError::invalid_token("invalid token"))?;
        let key = self
            .keys
            .cached_decoding_key(&kid)
            .ok_or_else(|| AppError::invalid_token("invalid token"))?;
        self.validate_with_key(token, &key)
    }

    fn validate_with_key(
        &self,
        token: &str,
        key: &jsonwebtoken::DecodingKey,
    ) -> Result<AccessClaims, AppError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let data = decode::<AccessClaims>(token, key, &validation)
            .map_err(|_| AppError::invalid_token("invalid token"))?;
        let mut claims = data.claims;

        if claims.sub.trim().is_empty() {
            return Err(AppError::invalid_token("invalid token"));
        }
        let now = Utc::now().timestamp();
        if claims.iat > now + IAT_SKEW_SECONDS {
            return Err(AppError::invalid_token("invalid token"));
        }
        if claims.exp < claims.iat {
            return Err(AppError::invalid_token("invalid token"));
        }
        claims.roles = dedupe_roles(&claims.roles);
        Ok(claims)
    }
}

/// Normalize a role list: trimmed, lowercased, de-duplicated, stable order
/// of first occurrence.
pub fn dedupe_roles(roles: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for role in roles {
        let role = role.trim().to_lowercase();
        if role.is_empty() || !seen.insert(role.clone()) {
            continue;
        }
        out.push(role);
    }
    out
}

pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

fn hash_matches(expected_hash: &str, secret: &str) -> bool {
    let actual = sha256_hex(secret);
    expected_hash.as_bytes().ct_eq(actual.as_bytes()).into()
}

fn split_refresh_token(raw: &str) -> Result<(&str, &str), AppError> {
    let mut parts = raw.splitn(2, '.');
    match (parts.next(), parts.next()) {
        (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() && !secret.contains('.') => {
            Ok((id, secret))
        }
        _ => Err(AppError::invalid_token("invalid refresh token format")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{MemoryKeyStore, MemoryRbacStore, MemoryRefreshTokenStore};
    use crate::models::UserStatus;
    use crate::services::password::hash_password;
    use crate::services::rbac::RbacStore as _;

    fn service() -> TokenService {
        let keys = Arc::new(KeyManager::new(Arc::new(MemoryKeyStore::new())));
        TokenService::new(
            keys,
            Arc::new(MemoryRefreshTokenStore::new()),
            Arc::new(MemoryRbacStore::new()),
            DEFAULT_ISSUER,
            Duration::minutes(DEFAULT_ACCESS_TTL_MINUTES),
            Duration::days(DEFAULT_REFRESH_TTL_DAYS),
        )
    }

    async fn service_with_user() -> (TokenService, User) {
        let rbac = Arc::new(MemoryRbacStore::new());
        let org = rbac.create_organization("Treasury", serde_json::Map::new()).await.unwrap();
        let user = rbac
            .create_user(&org.id, "ops@qazna.org", &hash_password("pass-1234").unwrap(), UserStatus::Active)
            .await
            .unwrap();
        let keys = Arc::new(KeyManager::new(Arc::new(MemoryKeyStore::new())));
        let service = TokenService::new(
            keys,
            Arc::new(MemoryRefreshTokenStore::new()),
            rbac,
            DEFAULT_ISSUER,
            Duration::minutes(15),
            Duration::days(14),
        );
        (service, user)
    }

    #[test]
    fn dedupe_roles_normalizes() {
        let roles = vec![
            " Admin ".to_string(),
            "admin".to_string(),
            "".to_string(),
            "Auditor".to_string(),
            "ADMIN".to_string(),
        ];
        assert_eq!(dedupe_roles(&roles), vec!["admin".to_string(), "auditor".to_string()]);
    }

    #[test]
    fn refresh_token_splitting() {
        assert!(split_refresh_token("id.secret").is_ok());
        assert!(split_refresh_token("id.").is_err());
        assert!(split_refresh_token(".secret").is_err());
        assert!(split_refresh_token("no-dot").is_err());
        assert!(split_refresh_token("a.b.c").is_err());
    }

    #[tokio::test]
    async fn issue_and_validate_round_trip() {
        let service = service();
        let issued = service
            .issue_for("user-1", &["Admin".into(), "admin".into()], None, vec![])
            .await
            .unwrap();
        assert!(issued.expires_at > Utc::now());

        let claims = service.parse_and_validate(&issued.token).await.unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.iss, DEFAULT_ISSUER);
        assert_eq!(claims.roles, vec!["admin".to_string()]);
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[tokio::test]
    async fn rejects_foreign_issuer_and_garbage() {
        let service = service();
        assert!(service.parse_and_validate("not-a-jwt").await.is_err());

        let other = TokenService::new(
            Arc::new(KeyManager::new(Arc::new(MemoryKeyStore::new()))),
            Arc::new(MemoryRefreshTokenStore::new()),
            Arc::new(MemoryRbacStore::new()),
            "someone-else",
            Duration::minutes(15),
            Duration::days(14),
        );
        let token = other.issue_for("user-1", &[], None, vec![]).await.unwrap().token;
        // Unknown kid for this service's key store.
        assert!(service.parse_and_validate(&token).await.is_err());
    }

    #[tokio::test]
    async fn cached_verification_requires_warm_cache() {
        let service = service();
        let issued = service.issue_for("user-9", &[], None, vec![]).await.unwrap();
        // ensure_active warmed the verifier cache during issuance.
        assert!(service.verify_cached(&issued.token).is_ok());
    }

    #[tokio::test]
    async fn password_grant_and_refresh_rotation() {
        let (service, _user) = service_with_user().await;

        let (pair, user) = service.issue_token_pair("ops@qazna.org", "pass-1234").await.unwrap();
        assert!(!pair.access_token.is_empty());
        assert!(pair.refresh_expires_at > pair.access_expires_at);

        let claims = service.parse_and_validate(&pair.access_token).await.unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.org.as_deref(), Some(user.organization_id.as_str()));

        // Rotation: the old refresh token works once.
        let (next, _) = service.refresh_token_pair(&pair.refresh_token).await.unwrap();
        assert_ne!(next.refresh_token, pair.refresh_token);

        // Reuse of the revoked token is fatal and revokes everything.
        assert!(service.refresh_token_pair(&pair.refresh_token).await.is_err());
        assert!(service.refresh_token_pair(&next.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn wrong_credentials_are_rejected() {
        let (service, _) = service_with_user().await;
        assert!(service.issue_token_pair("ops@qazna.org", "nope").await.is_err());
        assert!(service.issue_token_pair("ghost@qazna.org", "pass-1234").await.is_err());
        assert!(service.issue_token_pair("", "").await.is_err());
    }
}
