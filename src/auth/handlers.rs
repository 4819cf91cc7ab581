use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{AuthResponse, LoginRequest, MeResponse, SignupRequest},
    jwt::{AuthUser, JwtKeys},
    services,
};
use crate::{error::ApiError, state::AppState};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let user = services::sign_up(
        state.users.as_ref(),
        &payload.name,
        &payload.email,
        &payload.password,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            success: true,
            message: "User created successfully",
            user: user.into(),
            token: None,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user = services::log_in(state.users.as_ref(), &payload.email, &payload.password).await?;
    let token = JwtKeys::from(&state.config.jwt)
        .sign(user.id)
        .map_err(ApiError::Internal)?;

    Ok(Json(AuthResponse {
        success: true,
        message: "Login successful",
        user: user.into(),
        token: Some(token),
    }))
}

#[instrument(skip(state))]
pub async fn me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<MeResponse>, ApiError> {
    let user = state
        .users
        .find_by_id(user_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::Unauthorized("User not found".into()))?;

    Ok(Json(MeResponse {
        success: true,
        data: user.into(),
    }))
}
