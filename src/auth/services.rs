use lazy_static::lazy_static;
use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use tracing::{info, warn};

use crate::auth::dto::UserPayload;
use crate::auth::password::{hash_password, verify_password};
use crate::auth::repo::UserRepo;
use crate::auth::repo_types::{Capabilities, NewUser, Token, User, UserChanges};
use crate::config::SuperuserConfig;
use crate::error::{AppError, FieldErrors};

pub const MIN_PASSWORD_LEN: usize = 5;
const MAX_FIELD_LEN: usize = 255;
const TOKEN_LEN: usize = 40;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Lowercases the domain part; the local part is case-sensitive and kept.
pub fn normalize_email(email: &str) -> String {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{}@{}", local, domain.to_lowercase()),
        None => email.to_string(),
    }
}

/// Fields besides email and password accepted at account creation.
#[derive(Debug, Clone, Default)]
pub struct NewUserFields {
    pub name: String,
    pub caps: Capabilities,
}

/// Profile fields that passed validation. `None` means not supplied.
#[derive(Debug, Default)]
pub struct ProfileInput {
    pub email: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
}

fn required(errors: &mut FieldErrors, field: &str, value: Option<String>, partial: bool) -> Option<String> {
    match value {
        None if partial => None,
        None => {
            errors.add(field, "This field is required.");
            None
        }
        Some(v) if v.trim().is_empty() => {
            errors.add(field, "This field may not be blank.");
            None
        }
        Some(v) => Some(v),
    }
}

/// Checks a user payload. With `partial`, absent fields are allowed.
pub fn validate_profile(payload: UserPayload, partial: bool) -> Result<ProfileInput, AppError> {
    let mut errors = FieldErrors::new();

    let email = required(&mut errors, "email", payload.email, partial)
        .map(|e| e.trim().to_string())
        .filter(|e| {
            if e.chars().count() > MAX_FIELD_LEN {
                errors.add("email", "Ensure this field has no more than 255 characters.");
                false
            } else if !is_valid_email(e) {
                errors.add("email", "Enter a valid email address.");
                false
            } else {
                true
            }
        });

    let password = required(&mut errors, "password", payload.password, partial).filter(|p| {
        if p.chars().count() < MIN_PASSWORD_LEN {
            errors.add(
                "password",
                format!("Ensure this field has at least {MIN_PASSWORD_LEN} characters."),
            );
            false
        } else {
            true
        }
    });

    let name = required(&mut errors, "name", payload.name, partial)
        .map(|n| n.trim().to_string())
        .filter(|n| {
            if n.chars().count() > MAX_FIELD_LEN {
                errors.add("name", "Ensure this field has no more than 255 characters.");
                false
            } else {
                true
            }
        });

    errors.into_result()?;
    Ok(ProfileInput {
        email,
        password,
        name,
    })
}

pub async fn create_user(
    repo: &dyn UserRepo,
    email: Option<&str>,
    password: &str,
    extra: NewUserFields,
) -> Result<User, AppError> {
    let email = email
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AppError::field("email", "Users must have an email address."))?;

    let new = NewUser {
        email: normalize_email(email),
        name: extra.name,
        password_hash: hash_password(password)?,
        caps: extra.caps,
    };
    let user = repo.insert_user(new).await?;
    info!(user_id = user.id, email = %user.email, "user created");
    Ok(user)
}

pub async fn create_superuser(repo: &dyn UserRepo, email: &str, password: &str) -> Result<User, AppError> {
    let fields = NewUserFields {
        caps: Capabilities::superuser(),
        ..Default::default()
    };
    let user = create_user(repo, Some(email), password, fields).await?;
    info!(user_id = user.id, email = %user.email, "superuser created");
    Ok(user)
}

/// Creates the configured bootstrap superuser unless the email is taken.
pub async fn ensure_superuser(repo: &dyn UserRepo, cfg: &SuperuserConfig) -> anyhow::Result<()> {
    let email = normalize_email(&cfg.email);
    if repo.find_by_email(&email).await?.is_some() {
        info!(email = %email, "superuser already present");
        return Ok(());
    }
    create_superuser(repo, &cfg.email, &cfg.password).await?;
    Ok(())
}

pub async fn update_profile(repo: &dyn UserRepo, user: &User, input: ProfileInput) -> Result<User, AppError> {
    let password_hash = match input.password.as_deref() {
        Some(p) => Some(hash_password(p)?),
        None => None,
    };
    let changes = UserChanges {
        email: input.email.as_deref().map(normalize_email),
        name: input.name,
        password_hash,
        caps: None,
    };
    let updated = repo.update_user(user.id, changes).await?;
    info!(user_id = updated.id, "profile updated");
    Ok(updated)
}

fn generate_token_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Exchanges credentials for a fresh token, replacing the previous one.
pub async fn issue_token(
    repo: &dyn UserRepo,
    email: Option<&str>,
    password: Option<&str>,
) -> Result<Token, AppError> {
    let email = email.map(str::trim).filter(|e| !e.is_empty());
    let password = password.filter(|p| !p.is_empty());
    let (Some(email), Some(password)) = (email, password) else {
        warn!("token request with blank credentials");
        return Err(AppError::AuthFailed);
    };

    let email = normalize_email(email);
    let Some(user) = repo.find_by_email(&email).await? else {
        warn!(email = %email, "token request for unknown email");
        return Err(AppError::AuthFailed);
    };

    if !verify_password(password, &user.password_hash)? {
        warn!(email = %email, user_id = user.id, "token request with invalid password");
        return Err(AppError::AuthFailed);
    }
    if !user.caps.is_active {
        warn!(user_id = user.id, "token request for inactive user");
        return Err(AppError::AuthFailed);
    }

    let token = repo.replace_token(user.id, &generate_token_key()).await?;
    info!(user_id = user.id, "token issued");
    Ok(token)
}

/// Maps a presented token to its active user.
pub async fn resolve_token(repo: &dyn UserRepo, key: &str) -> Result<User, AppError> {
    let user = repo
        .find_user_by_token(key)
        .await?
        .ok_or_else(|| AppError::Unauthenticated("Invalid token.".into()))?;
    if !user.caps.is_active {
        return Err(AppError::Unauthenticated("User inactive or deleted.".into()));
    }
    Ok(user)
}
