use axum::extract::{Path, State};
use serde::Serialize;
use uuid::Uuid;

use crate::api::handler_utils::{not_found_error, ok_reply, validation_error, ApiReply};
use crate::api::server::AppState;
use crate::pipeline::service::RunSnapshot;

#[derive(Debug, Clone, Serialize)]
struct ListRunsResponse {
    count: usize,
    runs: Vec<RunSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
struct CancelRunResponse {
    run_id: String,
    cancelled: bool,
}

pub async fn list_runs_handler(State(state): State<AppState>) -> ApiReply {
    let runs = state.generation.active_runs();
    ok_reply(ListRunsResponse {
        count: runs.len(),
        runs,
    })
}

pub async fn cancel_run_handler(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiReply {
    let Ok(parsed) = Uuid::parse_str(run_id.as_str()) else {
        return validation_error(format!("runId '{run_id}' is not a UUID"));
    };

    if state.generation.cancel(parsed) {
        ok_reply(CancelRunResponse {
            run_id,
            cancelled: true,
        })
    } else {
        not_found_error(format!("run '{run_id}' is not in flight"))
    }
}
