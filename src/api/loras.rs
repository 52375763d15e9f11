use axum::extract::State;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::api::handler_utils::{
    internal_error, map_lora_error, ok_reply, validation_error, ApiReply,
};
use crate::api::server::AppState;
use crate::db::loras::LoraRecord;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadLoraInput {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub data_base64: String,
    #[serde(default)]
    pub default_scale: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
struct ListLorasResponse {
    count: usize,
    loras: Vec<LoraRecord>,
}

pub async fn list_loras_handler(State(state): State<AppState>) -> ApiReply {
    let registry = state.loras.clone();
    let result = tokio::task::spawn_blocking(move || registry.list()).await;

    match result {
        Ok(Ok(loras)) => ok_reply(ListLorasResponse {
            count: loras.len(),
            loras,
        }),
        Ok(Err(error)) => map_lora_error(error),
        Err(join_error) => internal_error(format!("lora listing task failed: {join_error}")),
    }
}

pub async fn upload_lora_handler(
    State(state): State<AppState>,
    Json(payload): Json<UploadLoraInput>,
) -> ApiReply {
    if payload.filename.trim().is_empty() {
        return validation_error("Field 'filename' is required");
    }
    let Ok(bytes) = BASE64_STANDARD.decode(payload.data_base64.as_bytes()) else {
        return validation_error("Field 'data_base64' is not valid base64");
    };
    if bytes.is_empty() {
        return validation_error("Field 'data_base64' decoded to zero bytes");
    }

    let registry = state.loras.clone();
    let result = tokio::task::spawn_blocking(move || {
        registry.register_upload(
            payload.filename.trim(),
            bytes.as_slice(),
            payload.default_scale,
        )
    })
    .await;

    match result {
        Ok(Ok(record)) => ok_reply(record),
        Ok(Err(error)) => map_lora_error(error),
        Err(join_error) => internal_error(format!("lora upload task failed: {join_error}")),
    }
}
