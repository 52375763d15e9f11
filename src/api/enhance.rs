use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::api::handler_utils::{not_found_error, ok_reply, validation_error, ApiReply};
use crate::api::server::AppState;
use crate::enhance::enhance_prompt;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnhanceInput {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub style: Option<String>,
}

pub async fn enhance_handler(
    State(state): State<AppState>,
    Json(payload): Json<EnhanceInput>,
) -> ApiReply {
    let prompt = payload.prompt.trim();
    if prompt.is_empty() {
        return validation_error("Field 'prompt' is required");
    }

    let style = match payload
        .style
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        Some(identifier) => match state.catalog.enhancement_style(identifier) {
            Ok(style) => Some(style),
            Err(error) => return not_found_error(error.to_string()),
        },
        None => None,
    };

    ok_reply(enhance_prompt(prompt, style))
}
