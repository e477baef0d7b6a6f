use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod filter;
pub mod handlers;
pub mod repo;
pub mod repo_types;
pub mod services;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::label_routes())
        .merge(handlers::recipe_routes())
        .merge(handlers::upload_routes())
}
