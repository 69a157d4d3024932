use serde_json::Value;
use thiserror::Error;

use opconsole_common::error_codes;
use opconsole_common::error_codes::ErrorCategory;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Authentication failed: {message}")]
    Auth { status: u16, message: String },

    #[error("Device unreachable: {message}")]
    DeviceUnreachable { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Backend returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response from backend: {message}")]
    InvalidResponse { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
}

impl ApiError {
    pub fn code(&self) -> i32 {
        match self {
            ApiError::Auth { .. } => error_codes::AUTH_FAILED,
            ApiError::DeviceUnreachable { .. } => error_codes::DEVICE_UNREACHABLE,
            ApiError::Network(_) => error_codes::NETWORK_ERROR,
            ApiError::Status { .. } => error_codes::HTTP_STATUS,
            ApiError::InvalidResponse { .. } => error_codes::INVALID_RESPONSE,
            ApiError::InvalidRequest { .. } => error_codes::INVALID_REQUEST,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ApiError::Network(err) if err.is_timeout() => ErrorCategory::Timeout,
            _ => error_codes::category_for_code(self.code()),
        }
    }

    pub fn is_retryable(&self) -> bool {
        error_codes::is_retryable(self.code())
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Auth { status, .. }
            | ApiError::DeviceUnreachable { status, .. }
            | ApiError::Status { status, .. } => Some(*status),
            ApiError::Network(err) => err.status().map(|s| s.as_u16()),
            ApiError::InvalidResponse { .. } | ApiError::InvalidRequest { .. } => None,
        }
    }

    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            ApiError::Auth { status: 401, .. } => {
                Some("Check the SSH credentials, or refresh the operator token (OPCONSOLE_TOKEN)")
            }
            ApiError::Auth { .. } => Some("Check the SSH username and password for this device"),
            ApiError::DeviceUnreachable { .. } => {
                Some("The device refused the connection. Verify it is online and SSH is enabled")
            }
            ApiError::Network(_) => {
                Some("Check that the backend is reachable (OPCONSOLE_API_URL) and retry")
            }
            ApiError::InvalidRequest { .. } => Some("Run with --help to see the required arguments"),
            ApiError::Status { .. } | ApiError::InvalidResponse { .. } => None,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }

    pub fn to_json(&self) -> Value {
        let mut obj = serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
            "category": self.category().as_str(),
            "retryable": self.is_retryable(),
        });
        if let Some(status) = self.status() {
            obj["status"] = serde_json::json!(status);
        }
        if let Some(suggestion) = self.suggestion() {
            obj["suggestion"] = serde_json::json!(suggestion);
        }
        obj
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string_pretty(&self.to_json()).unwrap_or_default()
    }
}

/// Extracts a human-readable message from an error body (`detail` or `message`).
pub(crate) fn message_from_body(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let pick = |key: &str| match value.get(key) {
        Some(Value::String(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
        // FastAPI validation errors put a list of objects under `detail`.
        Some(Value::Array(items)) if !items.is_empty() => Some(
            items
                .iter()
                .map(|item| {
                    item.get("msg")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| item.to_string())
                })
                .collect::<Vec<_>>()
                .join("; "),
        ),
        _ => None,
    };
    pick("detail").or_else(|| pick("message"))
}
