use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::db::models::{GameContext, PredictionStatus, Recommendation};
use crate::engine::performance::DEFAULT_WINDOW_DAYS;
use crate::engine::PredictionEngine;
use crate::error::TrackerError;

type ApiError = (StatusCode, String);

#[derive(Clone)]
pub struct AppState {
    pub engine: PredictionEngine,
}

/// JSON API over the prediction engine.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/recommendations", post(recommend_handler))
        .route("/api/tracking", post(track_handler))
        .route("/api/reconcile", post(reconcile_handler))
        .route("/api/calibration", get(calibration_handler))
        .route("/api/performance", get(performance_handler))
        .route("/api/predictions", get(predictions_handler))
        .route("/api/predictions/:id", get(prediction_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn tracker_error(e: TrackerError) -> ApiError {
    match e {
        TrackerError::NotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
        TrackerError::UnknownStatus(_) => (StatusCode::BAD_REQUEST, e.to_string()),
        other => internal(other),
    }
}

#[derive(Debug, Default, Deserialize)]
struct RecommendParams {
    #[serde(default)]
    track: bool,
}

#[derive(Serialize)]
struct RecommendResponse {
    recommendation: Recommendation,
    #[serde(skip_serializing_if = "Option::is_none")]
    tracking_id: Option<String>,
}

async fn recommend_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RecommendParams>,
    Json(context): Json<GameContext>,
) -> Result<impl IntoResponse, ApiError> {
    let recommendation = state
        .engine
        .compute_recommendation(context)
        .await
        .map_err(internal)?;
    let tracking_id = if params.track {
        Some(
            state
                .engine
                .track_recommendation(&recommendation)
                .map_err(internal)?,
        )
    } else {
        None
    };
    Ok(Json(RecommendResponse {
        recommendation,
        tracking_id,
    }))
}

#[derive(Serialize)]
struct TrackResponse {
    tracking_id: String,
}

async fn track_handler(
    State(state): State<Arc<AppState>>,
    Json(recommendation): Json<Recommendation>,
) -> Result<impl IntoResponse, ApiError> {
    let tracking_id = state
        .engine
        .track_recommendation(&recommendation)
        .map_err(internal)?;
    Ok((StatusCode::CREATED, Json(TrackResponse { tracking_id })))
}

#[derive(Debug, Default, Deserialize)]
struct ReconcileParams {
    lookback_days: Option<i64>,
}

async fn reconcile_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReconcileParams>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .engine
        .reconcile_outcomes(params.lookback_days)
        .await
        .map(Json)
        .map_err(internal)
}

async fn calibration_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .engine
        .calibration_stats()
        .await
        .map(Json)
        .map_err(internal)
}

#[derive(Debug, Default, Deserialize)]
struct PerformanceParams {
    days: Option<i64>,
}

async fn performance_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PerformanceParams>,
) -> Result<impl IntoResponse, ApiError> {
    let days = params.days.unwrap_or(DEFAULT_WINDOW_DAYS).clamp(1, 365);
    state
        .engine
        .performance_summary(days)
        .map(Json)
        .map_err(internal)
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    status: Option<String>,
    limit: Option<i64>,
}

async fn predictions_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<PredictionStatus>)
        .transpose()
        .map_err(tracker_error)?;
    let limit = params.limit.unwrap_or(100).clamp(1, 1000);
    state
        .engine
        .list_predictions(status, limit)
        .map(Json)
        .map_err(tracker_error)
}

async fn prediction_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .engine
        .get_prediction(&id)
        .map(Json)
        .map_err(tracker_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_tracker_errors_to_status_codes() {
        let (code, body) = tracker_error(TrackerError::NotFound("abc".to_string()));
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert!(body.contains("abc"));

        let (code, _) = tracker_error(TrackerError::UnknownStatus("MAYBE".to_string()));
        assert_eq!(code, StatusCode::BAD_REQUEST);

        let (code, _) = tracker_error(TrackerError::Storage(rusqlite::Error::InvalidQuery));
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
