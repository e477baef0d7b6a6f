use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Account flags checked at authorization points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Capabilities {
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            is_active: true,
            is_staff: false,
            is_superuser: false,
        }
    }
}

impl Capabilities {
    pub fn superuser() -> Self {
        Self {
            is_active: true,
            is_staff: true,
            is_superuser: true,
        }
    }
}

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 hash, not exposed in JSON
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub caps: Capabilities,
    pub created_at: OffsetDateTime,
}

/// Insert payload; the email is already normalized and the password hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub caps: Capabilities,
}

/// Column-wise patch; `None` leaves the column alone.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub email: Option<String>,
    pub name: Option<String>,
    pub password_hash: Option<String>,
    pub caps: Option<Capabilities>,
}

/// Bearer token row, one per user.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Token {
    pub key: String,
    pub user_id: i64,
    pub created_at: OffsetDateTime,
}
