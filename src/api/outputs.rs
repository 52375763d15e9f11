use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

use crate::api::handler_utils::{internal_error, not_found_error};
use crate::api::server::AppState;
use crate::storage::mime_for_path;

/// Streams a published artifact back as raw bytes with its image MIME type.
/// Unsafe names and misses both collapse to a 404 envelope.
pub async fn download_output_handler(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Response {
    let Some(path) = state.artifacts.resolve_output(filename.as_str()) else {
        return not_found_error(format!("no published output named '{filename}'")).into_response();
    };

    let mime = mime_for_path(path.as_path());
    let result = tokio::task::spawn_blocking(move || std::fs::read(path)).await;

    match result {
        Ok(Ok(bytes)) => ([(header::CONTENT_TYPE, mime)], bytes).into_response(),
        Ok(Err(error)) => {
            internal_error(format!("output read failed for '{filename}': {error}")).into_response()
        }
        Err(join_error) => {
            internal_error(format!("output read task failed: {join_error}")).into_response()
        }
    }
}
