use sqlx::PgPool;
use time::OffsetDateTime;
use tracing::{error, warn};
use uuid::Uuid;

use crate::users::error::StoreError;
use crate::users::model::{
    is_valid_email, normalize_email, DirtyFields, NewUser, PendingUser, Role, User,
    UserCredentials, UserField, UserPatch,
};
use crate::users::password::hash_credential;

const MIN_CREDENTIAL_LEN: usize = 8;

/// Pre-persist hook. Validates and transforms a candidate record before any
/// write reaches storage: a dirty credential is plaintext and gets a fresh
/// salted hash; a clean credential passes through byte-for-byte, so a stored
/// encoding is never re-hashed. Any failure aborts the whole write.
pub fn prepare_write(
    mut pending: PendingUser,
    dirty: &DirtyFields,
) -> Result<PendingUser, StoreError> {
    if dirty.contains(UserField::Email) {
        pending.email = normalize_email(&pending.email);
        if !is_valid_email(&pending.email) {
            return Err(StoreError::InvalidEmail);
        }
    }

    if dirty.contains(UserField::Credential) {
        if pending.credential.len() < MIN_CREDENTIAL_LEN {
            return Err(StoreError::WeakCredential);
        }
        pending.credential = hash_credential(&pending.credential)?;
    }

    // Role is typed and the refresh secret is opaque; nothing to transform.
    Ok(pending)
}

/// Run the hook off the async executor; hashing is the one deliberately
/// expensive step in the write path.
async fn prepare_write_off_loop(
    pending: PendingUser,
    dirty: DirtyFields,
) -> Result<PendingUser, StoreError> {
    tokio::task::spawn_blocking(move || prepare_write(pending, &dirty))
        .await
        .map_err(|e| StoreError::Hash(format!("hash task failed: {e}")))?
}

/// Current column values loaded before an update.
#[derive(sqlx::FromRow)]
struct CurrentRow {
    email: String,
    credential_hash: String,
    refresh_secret: Option<String>,
    role: Role,
}

impl User {
    /// Insert a new record. Every field is dirty. The unique index on the
    /// normalized email is the authority on duplicates under concurrent
    /// writers; there is no pre-check here.
    pub async fn insert(db: &PgPool, new_user: NewUser) -> Result<User, StoreError> {
        let pending = PendingUser {
            email: new_user.email,
            credential: new_user.credential,
            refresh_secret: new_user.refresh_secret,
            role: new_user.role.unwrap_or_default(),
        };
        let pending = prepare_write_off_loop(pending, DirtyFields::all()).await?;

        let now = OffsetDateTime::now_utc();
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, credential_hash, refresh_secret, role, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING id, email, refresh_secret, role, created_at, updated_at
            "#,
        )
        .bind(&pending.email)
        .bind(&pending.credential)
        .bind(&pending.refresh_secret)
        .bind(pending.role)
        .bind(now)
        .fetch_one(db)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                warn!(email = %pending.email, "email already registered");
                StoreError::DuplicateEmail
            } else {
                error!(error = %e, "insert user failed");
                StoreError::Database(e)
            }
        })?;
        Ok(user)
    }

    /// Apply a partial update. Only patched fields are marked dirty, so an
    /// untouched credential keeps its stored encoding unchanged.
    pub async fn update(db: &PgPool, id: Uuid, patch: UserPatch) -> Result<User, StoreError> {
        let current = sqlx::query_as::<_, CurrentRow>(
            r#"
            SELECT email, credential_hash, refresh_secret, role
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or(StoreError::NotFound)?;

        let mut pending = PendingUser {
            email: current.email,
            credential: current.credential_hash,
            refresh_secret: current.refresh_secret,
            role: current.role,
        };
        let mut dirty = DirtyFields::default();
        if let Some(plain) = patch.credential {
            pending.credential = plain;
            dirty.mark(UserField::Credential);
        }
        if let Some(role) = patch.role {
            pending.role = role;
            dirty.mark(UserField::Role);
        }
        if let Some(secret) = patch.refresh_secret {
            pending.refresh_secret = secret;
            dirty.mark(UserField::RefreshSecret);
        }

        let pending = prepare_write_off_loop(pending, dirty).await?;

        let now = OffsetDateTime::now_utc();
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET credential_hash = $2, refresh_secret = $3, role = $4, updated_at = $5
            WHERE id = $1
            RETURNING id, email, refresh_secret, role, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&pending.credential)
        .bind(&pending.refresh_secret)
        .bind(pending.role)
        .bind(now)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    /// Find a user by email through the default projection.
    pub async fn find_by_email(db: &PgPool, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, refresh_secret, role, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(normalize_email(email))
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Find a user by email including the credential hash. The explicit
    /// opt-in for authentication flows; everything else uses
    /// [`find_by_email`](User::find_by_email).
    pub async fn find_credentials_by_email(
        db: &PgPool,
        email: &str,
    ) -> Result<Option<UserCredentials>, StoreError> {
        let user = sqlx::query_as::<_, UserCredentials>(
            r#"
            SELECT id, email, credential_hash
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(normalize_email(email))
        .fetch_optional(db)
        .await?;
        Ok(user)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::password::verify_credential;

    fn pending(email: &str, credential: &str) -> PendingUser {
        PendingUser {
            email: email.into(),
            credential: credential.into(),
            refresh_secret: None,
            role: Role::default(),
        }
    }

    #[test]
    fn dirty_credential_is_hashed() {
        let plain = "hunter2hunter2";
        let out = prepare_write(pending("user@example.com", plain), &DirtyFields::all())
            .expect("prepare should succeed");

        assert_ne!(out.credential, plain);
        assert!(out.credential.starts_with("$argon2"));
        assert!(verify_credential(plain, &out.credential).expect("verify should succeed"));
    }

    #[test]
    fn clean_credential_passes_through_unchanged() {
        let encoding =
            hash_credential("hunter2hunter2").expect("hashing should succeed");

        let mut dirty = DirtyFields::default();
        dirty.mark(UserField::Role);
        let out = prepare_write(pending("user@example.com", &encoding), &dirty)
            .expect("prepare should succeed");

        // Re-saving without touching the credential must not re-hash.
        assert_eq!(out.credential, encoding);
    }

    #[test]
    fn re_dirtied_credential_gets_a_fresh_salt() {
        let plain = "hunter2hunter2";
        let mut dirty = DirtyFields::default();
        dirty.mark(UserField::Credential);

        let first = prepare_write(pending("user@example.com", plain), &dirty)
            .expect("prepare should succeed");
        let second = prepare_write(pending("user@example.com", plain), &dirty)
            .expect("prepare should succeed");

        assert_ne!(first.credential, second.credential);
        assert!(verify_credential(plain, &first.credential).unwrap());
        assert!(verify_credential(plain, &second.credential).unwrap());
    }

    #[test]
    fn email_is_normalized_before_persistence() {
        let out = prepare_write(
            pending("  User@Example.com ", "hunter2hunter2"),
            &DirtyFields::all(),
        )
        .expect("prepare should succeed");
        assert_eq!(out.email, "user@example.com");
    }

    #[test]
    fn cased_spellings_collide_on_the_same_identity_key() {
        let a = prepare_write(pending("User@Example.com", "hunter2hunter2"), &DirtyFields::all())
            .expect("prepare should succeed");
        let b = prepare_write(pending("user@example.com", "hunter2hunter2"), &DirtyFields::all())
            .expect("prepare should succeed");

        // Identical keys reach the store; its unique index admits one.
        assert_eq!(a.email, b.email);
    }

    #[test]
    fn invalid_email_aborts_the_write() {
        let err = prepare_write(pending("not-an-email", "hunter2hunter2"), &DirtyFields::all())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidEmail));
    }

    #[test]
    fn short_credential_aborts_the_write() {
        let err = prepare_write(pending("user@example.com", "short"), &DirtyFields::all())
            .unwrap_err();
        assert!(matches!(err, StoreError::WeakCredential));

        let err =
            prepare_write(pending("user@example.com", ""), &DirtyFields::all()).unwrap_err();
        assert!(matches!(err, StoreError::WeakCredential));
    }

    #[tokio::test]
    async fn hook_runs_off_the_accept_loop() {
        let plain = "hunter2hunter2";
        let out = prepare_write_off_loop(pending("user@example.com", plain), DirtyFields::all())
            .await
            .expect("prepare should succeed");
        assert!(verify_credential(plain, &out.credential).unwrap());
    }
}
