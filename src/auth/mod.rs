use crate::state::AppState;
use axum::Router;

mod dto;
pub mod handlers;
pub mod jwt;
pub mod repo;
pub mod repo_types;
pub mod services;

pub use repo::{InMemoryUserRepository, PgUserRepository, UserRepository};

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
