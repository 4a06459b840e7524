use thiserror::Error;

/// Failure classes of the user store. Every variant is recoverable at the
/// caller; none of these terminate the process.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid email address")]
    InvalidEmail,

    #[error("credential too short")]
    WeakCredential,

    #[error("email already registered")]
    DuplicateEmail,

    #[error("user not found")]
    NotFound,

    #[error("credential hashing failed: {0}")]
    Hash(String),

    #[error("malformed credential encoding")]
    MalformedEncoding,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}
