use std::io;

use opconsole_api::ApiError;
use opconsole_api::DeviceId;
use opconsole_common::error_codes;
use opconsole_common::error_codes::ErrorCategory;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Backend(#[from] ApiError),

    #[error("Session transport error: {reason}")]
    Transport { reason: String },

    #[error("Connection lost; gave up after {attempts} reconnection attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Command '{command}' rejected: {message}")]
    ValidationRejected { command: String, message: String },

    #[error("Command failed: {message}")]
    ExecutionFailed { message: String },

    #[error("Terminal error: {0}")]
    Terminal(#[from] io::Error),

    #[error("Device {device_id} is not assigned to this operator")]
    DeviceNotFound { device_id: DeviceId },

    #[error("Cannot {operation} while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Invalid credentials: {message}")]
    InvalidCredentials { message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl SessionError {
    pub fn code(&self) -> i32 {
        match self {
            SessionError::Backend(err) => err.code(),
            SessionError::Transport { .. } | SessionError::ReconnectExhausted { .. } => {
                error_codes::TRANSPORT_ERROR
            }
            SessionError::ValidationRejected { .. } => error_codes::VALIDATION_REJECTED,
            SessionError::ExecutionFailed { .. } => error_codes::EXECUTION_FAILED,
            SessionError::Terminal(_) => error_codes::TERMINAL_ERROR,
            SessionError::DeviceNotFound { .. } => error_codes::DEVICE_NOT_FOUND,
            SessionError::InvalidState { .. } => error_codes::INVALID_STATE,
            SessionError::InvalidCredentials { .. } => error_codes::INVALID_CREDENTIALS,
            SessionError::InvalidConfig { .. } => error_codes::INVALID_REQUEST,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            SessionError::Backend(err) => err.category(),
            _ => error_codes::category_for_code(self.code()),
        }
    }

    pub fn context(&self) -> SessionErrorContext {
        let operation = match self {
            SessionError::Backend(_) => "backend",
            SessionError::Transport { .. } | SessionError::ReconnectExhausted { .. } => "socket",
            SessionError::ValidationRejected { .. } => "preflight",
            SessionError::ExecutionFailed { .. } => "execute",
            SessionError::Terminal(_) => "terminal",
            SessionError::DeviceNotFound { .. } => "device_lookup",
            SessionError::InvalidState { operation, .. } => operation,
            SessionError::InvalidCredentials { .. } => "credentials",
            SessionError::InvalidConfig { .. } => "config",
        };
        SessionErrorContext {
            operation,
            reason: self.to_string(),
        }
    }

    pub fn suggestion(&self) -> String {
        match self {
            SessionError::Backend(err) => err
                .suggestion()
                .unwrap_or("The backend rejected the request. Check its logs for details.")
                .to_string(),
            SessionError::Transport { .. } => {
                "Check that the terminal gateway is reachable (OPCONSOLE_SOCKET_URL).".to_string()
            }
            SessionError::ReconnectExhausted { .. } => {
                "Run 'connect' again, or raise OPCONSOLE_RECONNECT_ATTEMPTS / OPCONSOLE_RECONNECT_DELAY_MS."
                    .to_string()
            }
            SessionError::ValidationRejected { .. } => {
                "The command is not permitted for this device. Ask an administrator to review the profile."
                    .to_string()
            }
            SessionError::ExecutionFailed { .. } => {
                "Check the command and retry. Run 'devices' to confirm the device is assigned.".to_string()
            }
            SessionError::Terminal(_) => {
                "Terminal mode error. Try restarting your terminal.".to_string()
            }
            SessionError::DeviceNotFound { .. } => {
                "Run 'devices' to list the devices assigned to you.".to_string()
            }
            SessionError::InvalidState { .. } => {
                "Close the current session and connect again.".to_string()
            }
            SessionError::InvalidCredentials { .. } => {
                "Pass --username and provide the password at the prompt or via --password-env."
                    .to_string()
            }
            SessionError::InvalidConfig { .. } => {
                "Check the OPCONSOLE_* environment variables and command-line flags.".to_string()
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Backend(err) => err.is_retryable(),
            SessionError::ReconnectExhausted { .. } => true,
            _ => error_codes::is_retryable(self.code()),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }

    pub fn to_payload(&self) -> SessionErrorPayload {
        SessionErrorPayload {
            code: self.code(),
            message: self.to_string(),
            category: self.category().as_str().to_string(),
            retryable: self.is_retryable(),
            context: self.context(),
            suggestion: self.suggestion(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionErrorContext {
    pub operation: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionErrorPayload {
    pub code: i32,
    pub message: String,
    pub category: String,
    pub retryable: bool,
    pub context: SessionErrorContext,
    pub suggestion: String,
}
