use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::api::error::ErrorKind;
use crate::api::response::{failure, success, ApiJson};
use crate::loras::LoraRegistryError;
use crate::pipeline::orchestrator::RunRejection;

pub type ApiReply = ApiJson<Value>;

pub fn ok_reply(payload: impl Serialize) -> ApiReply {
    success(serde_json::to_value(payload).expect("api payload should serialize"))
}

pub fn error_reply(
    status: StatusCode,
    kind: ErrorKind,
    code: impl Into<String>,
    message: impl Into<String>,
) -> ApiReply {
    failure(status, kind, code, message, None)
}

pub fn validation_error(message: impl Into<String>) -> ApiReply {
    error_reply(
        StatusCode::BAD_REQUEST,
        ErrorKind::Validation,
        "validation_error",
        message,
    )
}

pub fn not_found_error(message: impl Into<String>) -> ApiReply {
    error_reply(
        StatusCode::NOT_FOUND,
        ErrorKind::Validation,
        "not_found",
        message,
    )
}

pub fn internal_error(message: impl Into<String>) -> ApiReply {
    let detail = message.into();
    error!(detail = %detail, "internal api error");
    error_reply(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Infra,
        "internal_error",
        "Internal server error",
    )
}

pub fn map_rejection(rejection: RunRejection) -> ApiReply {
    match rejection {
        RunRejection::Validation(message) => validation_error(message),
        RunRejection::NotFound { .. } => not_found_error(rejection.to_string()),
        RunRejection::Internal(message) => internal_error(message),
    }
}

pub fn map_lora_error(error: LoraRegistryError) -> ApiReply {
    match error {
        LoraRegistryError::NotFound(_) => not_found_error(error.to_string()),
        LoraRegistryError::Validation(message) => validation_error(message),
        LoraRegistryError::Io(source) => internal_error(format!("lora filesystem error: {source}")),
        LoraRegistryError::Store(source) => internal_error(format!("lora store error: {source}")),
    }
}
