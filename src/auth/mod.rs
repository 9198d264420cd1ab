use crate::state::AppState;
use axum::Router;

mod claims;
mod cookies;
mod dto;
pub(crate) mod extractors;
pub mod handlers;
pub mod password;
pub mod repo;
pub mod repo_types;
mod services;
pub mod tokens;

pub fn router() -> Router<AppState> {
    handlers::user_routes()
}
