use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{
    dto::{AnalyzeResponse, DataResponse, HistoryQuery},
    services::{analyze_upload, ImageUpload},
};
use crate::{error::ApiError, meals::MealRecord, state::AppState};

const MULTIPART_OVERHEAD: usize = 1024 * 1024;
const IMAGE_FIELD: &str = "image";

pub fn analysis_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/analyze",
            post(analyze).layer(DefaultBodyLimit::max(max_upload_bytes + MULTIPART_OVERHEAD)),
        )
        .route("/analyze/history", get(history))
        .route("/analyze/:id", get(get_meal))
}

async fn read_image(mut mp: Multipart) -> Result<Option<ImageUpload>, ApiError> {
    let mut upload = None;
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e.body_text())))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let mime_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "image/jpeg".into());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read image: {}", e.body_text())))?;
        upload = Some(ImageUpload { bytes, mime_type });
    }
    Ok(upload)
}

/// POST /api/analyze (multipart, field `image`)
#[instrument(skip(state, mp))]
pub async fn analyze(
    State(state): State<AppState>,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let upload = match mp {
        Ok(mp) => read_image(mp).await?,
        Err(rejection) => {
            warn!(error = %rejection, "request is not multipart");
            None
        }
    };

    let outcome = analyze_upload(&state, upload).await?;
    Ok(Json(AnalyzeResponse {
        success: true,
        degraded: outcome.degraded,
        data: outcome.record,
    }))
}

#[instrument(skip(state))]
pub async fn history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<DataResponse<Vec<MealRecord>>>, ApiError> {
    let capacity = state.config.history_capacity;
    let limit = q.limit.unwrap_or(capacity).clamp(1, capacity);
    let meals = state.meals.list(limit).await.map_err(ApiError::internal)?;
    Ok(Json(DataResponse {
        success: true,
        data: meals,
    }))
}

#[instrument(skip(state))]
pub async fn get_meal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DataResponse<MealRecord>>, ApiError> {
    let meal = state
        .meals
        .get(id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::NotFound("Meal not found".into()))?;
    Ok(Json(DataResponse {
        success: true,
        data: meal,
    }))
}
