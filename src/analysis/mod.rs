mod dto;
pub mod handlers;
pub mod parser;
pub mod prompt;
pub mod services;
pub mod vision;

use crate::state::AppState;
use axum::Router;

pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    handlers::analysis_routes(max_upload_bytes)
}
