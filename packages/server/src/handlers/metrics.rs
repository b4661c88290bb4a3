use axum::Json;
use axum::extract::State;
use tracing::instrument;

use crate::error::AppError;
use crate::models::metrics::QueueMetricsResponse;
use crate::queue;
use crate::state::AppState;

#[instrument(skip(state))]
pub async fn queue_metrics(
    State(state): State<AppState>,
) -> Result<Json<QueueMetricsResponse>, AppError> {
    let depth = queue::depth(&state.db).await?;
    Ok(Json(depth.into()))
}
