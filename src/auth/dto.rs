use serde::{Deserialize, Serialize};

use crate::auth::repo_types::User;

/// Body for `POST /user/create` and `PUT`/`PATCH /user/me`.
#[derive(Debug, Default, Deserialize)]
pub struct UserPayload {
    pub email: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
}

/// Request body for token issuance.
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct UserResponse {
    pub email: String,
    pub name: String,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            email: u.email,
            name: u.name,
        }
    }
}
