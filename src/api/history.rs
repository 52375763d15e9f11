use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use crate::api::handler_utils::{internal_error, ok_reply, ApiReply};
use crate::api::server::AppState;
use crate::db::history::{HistoryQuery, HistoryRecord};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryListQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct HistoryListResponse {
    count: usize,
    records: Vec<HistoryRecord>,
}

pub async fn list_history_handler(
    State(state): State<AppState>,
    Query(query): Query<HistoryListQuery>,
) -> ApiReply {
    let store = state.history.clone();
    let result = tokio::task::spawn_blocking(move || {
        store.list(&HistoryQuery {
            limit: query.limit,
            offset: query.offset,
            search: query.search,
        })
    })
    .await;

    match result {
        Ok(Ok(records)) => ok_reply(HistoryListResponse {
            count: records.len(),
            records,
        }),
        Ok(Err(error)) => internal_error(format!("history listing failed: {error}")),
        Err(join_error) => internal_error(format!("history listing task failed: {join_error}")),
    }
}
