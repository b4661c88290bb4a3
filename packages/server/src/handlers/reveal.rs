use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::instrument;

use crate::error::AppError;
use crate::extractors::json::AppJson;
use crate::models::reveal::{JobPollQuery, RevealRequest, RevealResponse};
use crate::reveal::RevealOutcome;
use crate::state::AppState;

use super::stream_response;

fn outcome_response(outcome: RevealOutcome) -> Response {
    let status = match outcome {
        RevealOutcome::Processing { .. } => StatusCode::ACCEPTED,
        RevealOutcome::Ready { .. } | RevealOutcome::Failed { .. } => StatusCode::OK,
    };
    (status, Json(RevealResponse::from(outcome))).into_response()
}

fn require_viewer(viewer_id: &str) -> Result<&str, AppError> {
    let viewer_id = viewer_id.trim();
    if viewer_id.is_empty() {
        return Err(AppError::Validation("viewer_id cannot be empty".into()));
    }
    Ok(viewer_id)
}

/// `POST /media/{id}/reveal`: 200 with a download link when a fresh artifact
/// exists, otherwise 202 with the job to poll.
#[instrument(skip(state, payload))]
pub async fn request_reveal(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    AppJson(payload): AppJson<RevealRequest>,
) -> Result<Response, AppError> {
    let viewer_id = require_viewer(&payload.viewer_id)?;
    let outcome = state.reveals.request_reveal(viewer_id, &item_id).await?;
    Ok(outcome_response(outcome))
}

#[instrument(skip(state))]
pub async fn poll_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<JobPollQuery>,
) -> Result<Response, AppError> {
    let viewer_id = require_viewer(&query.viewer_id)?;
    let outcome = state.reveals.poll_job(&job_id, viewer_id).await?;
    Ok(outcome_response(outcome))
}

pub async fn reveal_content(
    State(state): State<AppState>,
    Path(access_log_id): Path<String>,
) -> Result<Response, AppError> {
    let artifact = state.reveals.open_artifact(&access_log_id).await?;
    stream_response(
        artifact.reader,
        artifact.size,
        &artifact.content_type,
        Some(&artifact.filename),
    )
}
