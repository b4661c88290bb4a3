pub mod media;
pub mod metrics;
pub mod objects;
pub mod reveal;
pub mod watermark;

use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::Response;
use common::storage::BoxReader;
use tokio_util::io::ReaderStream;

use crate::error::AppError;

/// Stream stored bytes back to the client.
pub(crate) fn stream_response(
    reader: BoxReader,
    size: u64,
    content_type: &str,
    filename: Option<&str>,
) -> Result<Response, AppError> {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, size.to_string())
        .header(header::CACHE_CONTROL, "private, no-store");
    if let Some(name) = filename {
        builder = builder.header(
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{name}\""),
        );
    }
    builder
        .body(Body::from_stream(ReaderStream::new(reader)))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))
}
