use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use crate::apply::ParseError;
use crate::packages::InstallError;
use crate::sandbox::SandboxError;

#[derive(Debug)]
pub enum ApiError {
    Validation {
        message: String,
        details: Option<Value>,
    },
    NoSandbox,
    SandboxNotFound(String),
    AiService(String),
    Sandbox(String),
    Internal(anyhow::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// Validation failure attributed to one request field, in the
    /// `{ _errors, <field>: { _errors } }` layout clients already parse.
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        ApiError::Validation {
            details: Some(field_errors(Some(field), &message)),
            message,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } | ApiError::NoSandbox => StatusCode::BAD_REQUEST,
            ApiError::SandboxNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::AiService(_) => StatusCode::BAD_GATEWAY,
            ApiError::Sandbox(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "VALIDATION_ERROR",
            ApiError::NoSandbox => "NO_SANDBOX_PROVIDER",
            ApiError::SandboxNotFound(_) => "SANDBOX_NOT_FOUND",
            ApiError::AiService(_) => "AI_SERVICE_ERROR",
            ApiError::Sandbox(_) => "SANDBOX_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let (message, details) = match self {
            ApiError::Validation { message, details } => (message, details),
            ApiError::NoSandbox => ("No active sandbox".to_string(), None),
            ApiError::SandboxNotFound(id) => (format!("Sandbox not found: {}", id), None),
            ApiError::AiService(msg) => (msg, None),
            ApiError::Sandbox(msg) => (msg, None),
            ApiError::Internal(e) => {
                error!(error = %e, "Internal error");
                (format!("Internal error: {}", e), None)
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: message,
                code,
                details,
            }),
        )
            .into_response()
    }
}

impl From<ParseError> for ApiError {
    fn from(e: ParseError) -> Self {
        ApiError::AiService(e.to_string())
    }
}

impl From<SandboxError> for ApiError {
    fn from(e: SandboxError) -> Self {
        match e {
            SandboxError::NotFound(id) => ApiError::SandboxNotFound(id),
            other => ApiError::Sandbox(other.to_string()),
        }
    }
}

impl From<InstallError> for ApiError {
    fn from(e: InstallError) -> Self {
        match e {
            InstallError::NoPackages => ApiError::field("packages", e.to_string()),
            InstallError::Upstream(inner) => ApiError::Sandbox(inner.to_string()),
        }
    }
}

static MISSING_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"missing field `([^`]+)`").expect("valid missing field pattern"));
static FIELD_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)[\w.\[\]]*: (.+)$").expect("valid field path pattern")
});

fn field_errors(field: Option<&str>, message: &str) -> Value {
    match field {
        Some(field) => json!({ "_errors": [], field: { "_errors": [message] } }),
        None => json!({ "_errors": [message] }),
    }
}

/// Attribute a body deserialization failure to the top-level field it names.
fn rejection_details(rejection: &JsonRejection) -> Value {
    let text = rejection.body_text();
    let JsonRejection::JsonDataError(_) = rejection else {
        return field_errors(None, &text);
    };

    let detail = text
        .split_once("target type: ")
        .map(|(_, detail)| detail)
        .unwrap_or(&text);
    if let Some(caps) = MISSING_FIELD.captures(detail) {
        return field_errors(Some(&caps[1]), detail);
    }
    match FIELD_PATH.captures(detail) {
        Some(caps) => field_errors(Some(&caps[1]), &caps[2]),
        None => field_errors(None, detail),
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::Validation {
            message: "Invalid request body".to_string(),
            details: Some(rejection_details(&e)),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}
