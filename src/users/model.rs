use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Authorization tag carried by every user record. Stored as the Postgres
/// enum `user_role`, so the store itself rejects any other value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "user_role", rename_all = "UPPERCASE")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// User record in the default read projection. The credential hash is not
/// part of this shape; callers that need it must go through
/// [`UserCredentials`].
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,                       // unique user ID
    pub email: String,                  // normalized identity key
    #[serde(skip_serializing)]
    pub refresh_secret: Option<String>, // long-lived secret, absent by default
    pub role: Role,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Credential projection for authentication flows. Requested explicitly,
/// never serialized.
#[derive(Debug, Clone, FromRow)]
pub struct UserCredentials {
    pub id: Uuid,
    pub email: String,
    pub credential_hash: String, // argon2 PHC string, salt embedded
}

/// Input for creating a record. `credential` is plaintext here and nowhere
/// past the pre-persist hook.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub credential: String,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub refresh_secret: Option<String>,
}

/// Partial update. The identity key is immutable after insert. The outer
/// `Option` on `refresh_secret` marks the field dirty; the inner one allows
/// clearing it.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub credential: Option<String>,
    pub role: Option<Role>,
    pub refresh_secret: Option<Option<String>>,
}

/// Candidate record handed to the pre-persist hook. `credential` holds
/// plaintext only while the field is marked dirty; otherwise it is the
/// stored encoding.
#[derive(Debug, Clone)]
pub struct PendingUser {
    pub email: String,
    pub credential: String,
    pub refresh_secret: Option<String>,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserField {
    Email,
    Credential,
    RefreshSecret,
    Role,
}

/// Which fields changed since the record was loaded.
#[derive(Debug, Clone, Default)]
pub struct DirtyFields(HashSet<UserField>);

impl DirtyFields {
    /// Every field dirty; the insert case.
    pub fn all() -> Self {
        let mut dirty = Self::default();
        for field in [
            UserField::Email,
            UserField::Credential,
            UserField::RefreshSecret,
            UserField::Role,
        ] {
            dirty.mark(field);
        }
        dirty
    }

    pub fn mark(&mut self, field: UserField) {
        self.0.insert(field);
    }

    pub fn contains(&self, field: UserField) -> bool {
        self.0.contains(&field)
    }
}

/// Lowercase and trim the identity key. Uniqueness holds over this
/// normalized form, so differently-cased spellings collide.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}
