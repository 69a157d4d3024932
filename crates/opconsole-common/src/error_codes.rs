//! Semantic error codes shared by the REST client and the session bridge.
//!
//! Codes are grouped by the layer that raises them:
//! - 1xx: backend REST calls (negotiation, execution, device listing)
//! - 2xx: terminal session bridge (socket, classifier, terminal surface)

// Negotiation errors
pub const AUTH_FAILED: i32 = 101;
pub const DEVICE_UNREACHABLE: i32 = 102;
pub const NETWORK_ERROR: i32 = 103;
pub const HTTP_STATUS: i32 = 104;
pub const INVALID_RESPONSE: i32 = 105;
pub const INVALID_REQUEST: i32 = 106;

// Session errors
pub const TRANSPORT_ERROR: i32 = 201;
pub const VALIDATION_REJECTED: i32 = 202;
pub const EXECUTION_FAILED: i32 = 203;
pub const TERMINAL_ERROR: i32 = 204;
pub const DEVICE_NOT_FOUND: i32 = 205;
pub const INVALID_STATE: i32 = 206;
pub const INVALID_CREDENTIALS: i32 = 207;

/// Error category used to pick exit codes and retry hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Resource not found (device)
    NotFound,
    /// Invalid input parameters
    InvalidInput,
    /// Credentials or token rejected
    Unauthorized,
    /// Internal error or protocol mismatch
    Internal,
    /// External dependency failure (backend, device, socket)
    External,
    /// Operation timed out
    Timeout,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::InvalidInput => "invalid_input",
            ErrorCategory::Unauthorized => "unauthorized",
            ErrorCategory::Internal => "internal",
            ErrorCategory::External => "external",
            ErrorCategory::Timeout => "timeout",
        }
    }

    /// sysexits-style process exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorCategory::InvalidInput => 64, // EX_USAGE
            ErrorCategory::NotFound => 69,     // EX_UNAVAILABLE
            ErrorCategory::External => 74,     // EX_IOERR
            ErrorCategory::Internal => 74,     // EX_IOERR
            ErrorCategory::Timeout => 75,      // EX_TEMPFAIL
            ErrorCategory::Unauthorized => 77, // EX_NOPERM
        }
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_found" => Ok(ErrorCategory::NotFound),
            "invalid_input" => Ok(ErrorCategory::InvalidInput),
            "unauthorized" => Ok(ErrorCategory::Unauthorized),
            "internal" => Ok(ErrorCategory::Internal),
            "external" => Ok(ErrorCategory::External),
            "timeout" => Ok(ErrorCategory::Timeout),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Returns whether an error code represents a transient condition.
pub fn is_retryable(code: i32) -> bool {
    matches!(code, NETWORK_ERROR | DEVICE_UNREACHABLE | TRANSPORT_ERROR)
}

/// Returns the error category for a given error code.
pub fn category_for_code(code: i32) -> ErrorCategory {
    match code {
        DEVICE_NOT_FOUND => ErrorCategory::NotFound,
        INVALID_REQUEST | INVALID_CREDENTIALS | VALIDATION_REJECTED => ErrorCategory::InvalidInput,
        AUTH_FAILED => ErrorCategory::Unauthorized,
        DEVICE_UNREACHABLE | NETWORK_ERROR | HTTP_STATUS | TRANSPORT_ERROR | EXECUTION_FAILED
        | TERMINAL_ERROR => ErrorCategory::External,
        _ => ErrorCategory::Internal,
    }
}
