//! Response envelope shared by every control endpoint.
//!
//! Success: the endpoint's fields flattened next to `"success": true`.
//! Failure: `{ success: false, message, error: { code, kind, message } }`
//! with an HTTP status chosen from the error taxonomy.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use intercom_core::errors::ErrorKind;
use intercom_engine::ControlError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                code: "INVALID_PARAMS",
                kind: ErrorKind::Validation.as_str(),
                message: message.into(),
            },
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorBody {
                code: "INTERNAL_ERROR",
                kind: ErrorKind::Internal.as_str(),
                message: message.into(),
            },
        }
    }
}

fn status_for(err: &ControlError) -> StatusCode {
    match err {
        ControlError::ChannelNotFound(_) | ControlError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        ControlError::AlreadyOpen { .. } | ControlError::SessionNotOpen { .. } => {
            StatusCode::CONFLICT
        }
        ControlError::Validation { .. } => StatusCode::BAD_REQUEST,
        ControlError::Transport { .. } => StatusCode::BAD_GATEWAY,
        ControlError::Sequencer { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ControlError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        Self {
            status: status_for(&err),
            body: ErrorBody {
                code: err.error_code(),
                kind: err.kind().as_str(),
                message: err.to_string(),
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_params(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(code = self.body.code, message = %self.body.message, "request failed");
        } else {
            tracing::debug!(code = self.body.code, message = %self.body.message, "request rejected");
        }
        let body = json!({
            "success": false,
            "message": self.body.message,
            "error": self.body,
        });
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult = Result<Json<Value>, ApiError>;

/// Wrap a payload as a success response. Objects are flattened, anything
/// else lands under `result`.
pub fn ok(payload: impl Serialize) -> ApiResult {
    let value = serde_json::to_value(payload).map_err(|e| ApiError::internal(e.to_string()))?;
    let body = match value {
        Value::Object(mut map) => {
            map.insert("success".into(), Value::Bool(true));
            Value::Object(map)
        }
        Value::Null => json!({ "success": true }),
        other => json!({ "success": true, "result": other }),
    };
    Ok(Json(body))
}
