//! Signing-key lifecycle: generate, activate, retire, cache, publish.
//!
//! At most one key is active at any instant. Rotation happens ahead of
//! expiry so tokens signed by the outgoing key stay verifiable for the
//! whole rotate window.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::pkcs8::{DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use qazna_core::error::AppError;
use qazna_core::ids;

use crate::models::key::{Jwk, JwksDocument};
use crate::models::{KeyStatus, SigningKey};

pub const RSA_KEY_BITS: usize = 2048;
pub const DEFAULT_KEY_TTL_HOURS: i64 = 48;
pub const DEFAULT_ROTATE_WINDOW_HOURS: i64 = 12;

/// Persistence operations for the signing-key table.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn find_active(&self) -> Result<Option<SigningKey>, AppError>;

    async fn find(&self, kid: &str) -> Result<Option<SigningKey>, AppError>;

    /// Retire every active row and insert `key` as the new active row in a
    /// single transaction.
    async fn rotate_in(&self, key: &SigningKey) -> Result<(), AppError>;

    /// All keys with `expires_at > cutoff`, newest first.
    async fn list_verifiable(&self, cutoff: DateTime<Utc>) -> Result<Vec<SigningKey>, AppError>;
}

/// The cached active signer handed to the token service.
#[derive(Clone)]
pub struct ActiveSigner {
    pub kid: String,
    pub expires_at: DateTime<Utc>,
    pub encoding_key: EncodingKey,
}

pub struct KeyManager {
    store: Arc<dyn KeyStore>,
    key_ttl: Duration,
    rotate_window: Duration,
    active: RwLock<Option<ActiveSigner>>,
    verifiers: RwLock<HashMap<String, DecodingKey>>,
    rotation: tokio::sync::Mutex<()>,
}

impl KeyManager {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self::with_windows(
            store,
            Duration::hours(DEFAULT_KEY_TTL_HOURS),
            Duration::hours(DEFAULT_ROTATE_WINDOW_HOURS),
        )
    }

    pub fn with_windows(store: Arc<dyn KeyStore>, key_ttl: Duration, rotate_window: Duration) -> Self {
        Self {
            store,
            key_ttl,
            rotate_window,
            active: RwLock::new(None),
            verifiers: RwLock::new(HashMap::new()),
            rotation: tokio::sync::Mutex::new(()),
        }
    }

    pub fn rotate_window(&self) -> Duration {
        self.rotate_window
    }

    /// Seed the store with an externally supplied keypair when no active key
    /// exists yet. Used for the environment-provided bootstrap pair.
    pub async fn bootstrap(
        &self,
        kid: Option<String>,
        private_pem: &str,
        public_pem: &str,
    ) -> Result<(), AppError> {
        EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("parse bootstrap private key: {e}")))?;
        DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("parse bootstrap public key: {e}")))?;

        let _guard = self.rotation.lock().await;
        if self.store.find_active().await?.is_some() {
            return Ok(());
        }
        let now = Utc::now();
        let key = SigningKey {
            kid: kid.filter(|k| !k.trim().is_empty()).unwrap_or_else(ids::new_id),
            public_pem: public_pem.to_string(),
            private_pem: private_pem.to_string(),
            created_at: now,
            expires_at: now + self.key_ttl,
            rotated_at: None,
            status: KeyStatus::Active,
        };
        self.store.rotate_in(&key).await?;
        self.cache_key(&key)?;
        Ok(())
    }

    /// Return the current signer, rotating first when the active key is
    /// missing or will expire within the rotate window.
    pub async fn ensure_active(&self) -> Result<ActiveSigner, AppError> {
        let now = Utc::now();
        if let Some(signer) = self.cached_active() {
            if signer.expires_at - now > self.rotate_window {
                return Ok(signer);
            }
        }

        let _guard = self.rotation.lock().await;
        // A concurrent caller may have rotated while we waited for the lock.
        if let Some(signer) = self.cached_active() {
            if signer.expires_at - Utc::now() > self.rotate_window {
                return Ok(signer);
            }
        }

        if let Some(key) = self.store.find_active().await? {
            if key.expires_at - Utc::now() > self.rotate_window {
                return self.cache_key(&key);
            }
        }

        let key = self.generate_key().await?;
        self.store.rotate_in(&key).await?;
        tracing::info!(kid = %key.kid, expires_at = %key.expires_at, "signing key rotated");
        self.cache_key(&key)
    }

    async fn generate_key(&self) -> Result<SigningKey, AppError> {
        let (private_pem, public_pem) = tokio::task::spawn_blocking(|| {
            let mut rng = rand::rngs::OsRng;
            let private = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
                .map_err(|e| anyhow::anyhow!("generate rsa key: {e}"))?;
            let private_pem = private
                .to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| anyhow::anyhow!("encode private key: {e}"))?
                .to_string();
            let public_pem = private
                .to_public_key()
                .to_public_key_pem(LineEnding::LF)
                .map_err(|e| anyhow::anyhow!("encode public key: {e}"))?;
            Ok::<_, anyhow::Error>((private_pem, public_pem))
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("keygen task: {e}")))?
        .map_err(AppError::Internal)?;

        let now = Utc::now();
        Ok(SigningKey {
            kid: ids::new_id(),
            public_pem,
            private_pem,
            created_at: now,
            expires_at: now + self.key_ttl,
            rotated_at: None,
            status: KeyStatus::Active,
        })
    }

    fn cached_active(&self) -> Option<ActiveSigner> {
        self.active.read().ok().and_then(|guard| guard.clone())
    }

    fn cache_key(&self, key: &SigningKey) -> Result<ActiveSigner, AppError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_pem.as_bytes())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("parse private key: {e}")))?;
        let decoding_key = DecodingKey::from_rsa_pem(key.public_pem.as_bytes())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("parse public key: {e}")))?;

        let signer = ActiveSigner {
            kid: key.kid.clone(),
            expires_at: key.expires_at,
            encoding_key,
        };
        if let Ok(mut guard) = self.active.write() {
            *guard = Some(signer.clone());
        }
        if let Ok(mut guard) = self.verifiers.write() {
            guard.insert(key.kid.clone(), decoding_key);
        }
        Ok(signer)
    }

    /// Look up a verification key by `kid`, filling the cache from the
    /// store on first use. Retired keys stay verifiable until their expiry
    /// has passed by more than the rotate window.
    pub async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, AppError> {
        if let Some(key) = self.cached_decoding_key(kid) {
            return Ok(key);
        }
        let key = self
            .store
            .find(kid)
            .await?
            .ok_or_else(|| AppError::invalid_token("unknown signing key"))?;
        if Utc::now() > key.expires_at + self.rotate_window {
            return Err(AppError::invalid_token("signing key expired"));
        }
        let decoding_key = DecodingKey::from_rsa_pem(key.public_pem.as_bytes())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("parse public key: {e}")))?;
        if let Ok(mut guard) = self.verifiers.write() {
            guard.insert(kid.to_string(), decoding_key.clone());
        }
        Ok(decoding_key)
    }

    /// Cache-only lookup for synchronous callers (the gRPC interceptor).
    pub fn cached_decoding_key(&self, kid: &str) -> Option<DecodingKey> {
        self.verifiers.read().ok().and_then(|guard| guard.get(kid).cloned())
    }

    /// Publish the active key plus retired-but-verifiable keys as a JWKS.
    pub async fn jwks(&self) -> Result<JwksDocument, AppError> {
        let cutoff = Utc::now() - self.rotate_window;
        let keys = self.store.list_verifiable(cutoff).await?;
        let mut jwks = Vec::with_capacity(keys.len());
        for key in keys {
            jwks.push(jwk_from_pem(&key.kid, &key.public_pem)?);
        }
        Ok(JwksDocument { keys: jwks })
    }
}

fn jwk_from_pem(kid: &str, public_pem: &str) -> Result<Jwk, AppError> {
    let public = RsaPublicKey::from_public_key_pem(public_pem)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("parse public key: {e}")))?;
    Ok(Jwk {
        kty: "RSA".to_string(),
        kid: kid.to_string(),
        usage: "sig".to_string(),
        alg: "RS256".to_string(),
        n: URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
        e: URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
    })
}
