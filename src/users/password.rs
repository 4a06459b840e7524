use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

use crate::users::error::StoreError;

/// Hash a plaintext credential with a fresh random salt. The returned PHC
/// string carries the salt and work-factor parameters, so verification
/// always replays the parameters the hash was created with.
pub fn hash_credential(plain: &str) -> Result<String, StoreError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            StoreError::Hash(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// Check a candidate plaintext against a stored encoding. A mismatch is
/// `Ok(false)`; only a malformed encoding is an error.
pub fn verify_credential(plain: &str, encoding: &str) -> Result<bool, StoreError> {
    let parsed = PasswordHash::new(encoding).map_err(|e| {
        error!(error = %e, "malformed credential encoding");
        StoreError::MalformedEncoding
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}
