use axum::extract::State;
use axum::Json;

use crate::api::handler_utils::{internal_error, map_rejection, ok_reply, ApiReply};
use crate::api::server::AppState;
use crate::pipeline::orchestrator::GenerateRequest;

/// Runs the whole pipeline synchronously. A run that reaches a terminal
/// state is a 200 even when its status is `failed`; only requests rejected
/// before the pipeline starts map to error statuses.
pub async fn generate_handler(
    State(state): State<AppState>,
    Json(payload): Json<GenerateRequest>,
) -> ApiReply {
    let service = state.generation.clone();
    let result = tokio::task::spawn_blocking(move || service.run(&payload)).await;

    match result {
        Ok(Ok(outcome)) => ok_reply(outcome),
        Ok(Err(rejection)) => map_rejection(rejection),
        Err(join_error) => internal_error(format!("generation task failed: {join_error}")),
    }
}
