use axum::{
    Router,
    routing::{get, post, put},
};

use crate::handlers;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/media", media_routes())
        .route("/jobs/{job_id}", get(handlers::reveal::poll_job))
        .route("/metrics", get(handlers::metrics::queue_metrics))
        .route(
            "/reveals/{access_log_id}/content",
            get(handlers::reveal::reveal_content),
        )
        .route("/objects/{hash}", get(handlers::objects::get_object))
        .route(
            "/watermarks/{text}",
            get(handlers::watermark::decode_watermark),
        )
}

fn media_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            post(handlers::media::upload_media).layer(handlers::media::upload_body_limit()),
        )
        .route("/{id}", get(handlers::media::get_media))
        .route(
            "/{id}/announcement",
            put(handlers::media::attach_announcement),
        )
        .route("/{id}/reveal", post(handlers::reveal::request_reveal))
}
