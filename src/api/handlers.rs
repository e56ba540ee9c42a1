use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    models::{CandidateRecord, CorrelationToken, Emotion},
};

use super::AppState;

// Request/Response types

#[derive(Debug, Deserialize)]
pub struct RecommendRequest {
    #[serde(default, alias = "text")]
    pub query: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub status: String,
    pub request_id: CorrelationToken,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ResultResponse {
    Ready {
        request_id: CorrelationToken,
        emotion: Option<Emotion>,
        recommendations: Vec<CandidateRecord>,
    },
    Pending {
        request_id: CorrelationToken,
    },
}

// Handlers

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let broker = state.channel.state();
    let status = if state.channel.is_available() {
        "healthy"
    } else {
        "degraded"
    };

    (StatusCode::OK, Json(json!({ "status": status, "broker": broker })))
}

/// Submits a mood text to the pipeline
pub async fn recommend(
    State(state): State<AppState>,
    Json(request): Json<RecommendRequest>,
) -> AppResult<(StatusCode, Json<SubmitResponse>)> {
    let request_id = state.gateway.submit(&request.query).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            status: "processing".to_string(),
            request_id,
        }),
    ))
}

/// Returns the result once, then reports pending again
pub async fn get_result(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> AppResult<Json<ResultResponse>> {
    let request_id: CorrelationToken = request_id
        .parse()
        .map_err(|_| AppError::InvalidInput(format!("Invalid request id: {}", request_id)))?;

    let response = match state.results.take(&request_id).await {
        Some(payload) => ResultResponse::Ready {
            request_id,
            emotion: payload.emotion,
            recommendations: payload.recommendations,
        },
        None => ResultResponse::Pending { request_id },
    };

    Ok(Json(response))
}
