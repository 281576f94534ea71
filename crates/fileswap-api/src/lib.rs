//! HTTP surface of the file swap service: the swap lifecycle engine, blob
//! sinks for the uploaded bytes, and the axum router tying them together.

pub mod blob;
pub mod engine;
pub mod error;
pub mod routes;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use fileswap_types::MAX_FILE_SIZE;
use tower_http::services::ServeDir;

pub use blob::{BlobError, BlobSink, HostedBlobSink, LocalBlobSink};
pub use engine::{SwapEngine, SwapError};
pub use error::ApiError;
pub use routes::AppState;

/// Request bodies may carry one maximal file plus form overhead.
pub const MAX_BODY_SIZE: usize = MAX_FILE_SIZE as usize + 1024 * 1024;

/// All swap routes. Local blobs are additionally served under `/uploads`.
pub fn router(state: AppState) -> Router {
    let public_dir = state.blobs.public_dir().map(|dir| dir.to_path_buf());

    let app = Router::new()
        .route("/upload", post(routes::upload_file))
        .route("/swap/upload", post(routes::upload_second_file))
        .route(
            "/swap/{id}",
            get(routes::get_swap).delete(routes::delete_swap),
        )
        .route("/download", get(routes::download))
        .route("/health", get(routes::health))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state);

    match public_dir {
        Some(dir) => app.nest_service("/uploads", ServeDir::new(dir)),
        None => app,
    }
}
