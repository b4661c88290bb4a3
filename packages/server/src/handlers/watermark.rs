use axum::Json;
use axum::extract::Path;
use common::watermark;

use crate::error::AppError;
use crate::models::watermark::DecodedWatermarkResponse;

/// Trace a mark read off a leaked copy back to its viewer.
pub async fn decode_watermark(
    Path(text): Path<String>,
) -> Result<Json<DecodedWatermarkResponse>, AppError> {
    let mark = watermark::decode(&text)
        .map_err(|e| AppError::Validation(format!("'{text}' is not a watermark: {e}")))?;
    Ok(Json(DecodedWatermarkResponse {
        viewer_id: mark.viewer_id,
        issued_at: mark.issued_at,
    }))
}
