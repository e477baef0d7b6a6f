use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{TokenRequest, TokenResponse, UserPayload, UserResponse},
        extractors::AuthUser,
        services::{self, NewUserFields},
    },
    error::AppError,
    extract::ApiJson,
    state::AppState,
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/user/create", post(create_user))
        .route("/user/token", post(create_token))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/user/me", get(get_me).put(replace_me).patch(patch_me))
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<UserPayload>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let input = services::validate_profile(payload, false)?;
    let password = input.password.unwrap_or_default();
    let user = services::create_user(
        state.users.as_ref(),
        input.email.as_deref(),
        &password,
        NewUserFields {
            name: input.name.unwrap_or_default(),
            ..Default::default()
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip(state, payload))]
pub async fn create_token(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<TokenRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let token = services::issue_token(
        state.users.as_ref(),
        payload.email.as_deref(),
        payload.password.as_deref(),
    )
    .await?;
    Ok(Json(TokenResponse { token: token.key }))
}

#[instrument(skip_all, fields(user_id = user.id))]
pub async fn get_me(AuthUser(user): AuthUser) -> Json<UserResponse> {
    Json(user.into())
}

#[instrument(skip_all, fields(user_id = user.id))]
pub async fn replace_me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(payload): ApiJson<UserPayload>,
) -> Result<Json<UserResponse>, AppError> {
    let input = services::validate_profile(payload, false)?;
    let user = services::update_profile(state.users.as_ref(), &user, input).await?;
    Ok(Json(user.into()))
}

#[instrument(skip_all, fields(user_id = user.id))]
pub async fn patch_me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(payload): ApiJson<UserPayload>,
) -> Result<Json<UserResponse>, AppError> {
    let input = services::validate_profile(payload, true)?;
    let user = services::update_profile(state.users.as_ref(), &user, input).await?;
    Ok(Json(user.into()))
}
