use axum::extract::{Path, State};
use axum::response::Response;

use crate::error::AppError;
use crate::state::AppState;

use super::stream_response;

/// Raw upload bytes by content hash; the source URL given to remote workers.
pub async fn get_object(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Response, AppError> {
    let (reader, size) = state.reveals.open_object(&hash).await?;
    stream_response(reader, size, "application/octet-stream", None)
}
