//! Argon2id password hashing. Parameters are part of the storage contract:
//! m=64 MiB, t=2, p=1, 16-byte salt, 32-byte tag, canonical PHC strings.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use qazna_core::error::AppError;

const MEMORY_KIB: u32 = 64 * 1024;
const ITERATIONS: u32 = 2;
const PARALLELISM: u32 = 1;
const TAG_LENGTH: usize = 32;

fn hasher() -> Result<Argon2<'static>, AppError> {
    let params = Params::new(MEMORY_KIB, ITERATIONS, PARALLELISM, Some(TAG_LENGTH))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("argon2 params: {e}")))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a password into a PHC string with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = hasher()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("hash password: {e}")))?;
    Ok(hash.to_string())
}

/// Verify a password against a stored PHC string in constant time.
pub fn verify_password(stored: &str, password: &str) -> Result<(), AppError> {
    let parsed = PasswordHash::new(stored)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid password hash: {e}")))?;
    hasher()?
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| AppError::unauthorized("invalid credentials"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_has_canonical_phc_shape() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(hash.starts_with("$argon2id$v=19$m=65536,t=2,p=1$"));
    }

    #[test]
    fn verify_round_trip() {
        let hash = hash_password("s3cret").unwrap();
        assert!(verify_password(&hash, "s3cret").is_ok());
        assert!(verify_password(&hash, "wrong").is_err());
    }

    #[test]
    fn salts_differ_between_hashes() {
        let first = hash_password("same").unwrap();
        let second = hash_password("same").unwrap();
        assert_ne!(first, second);
        assert!(verify_password(&first, "same").is_ok());
        assert!(verify_password(&second, "same").is_ok());
    }
}
