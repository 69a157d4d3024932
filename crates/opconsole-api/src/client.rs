//! Blocking HTTP client for the operator backend.

use std::env;
use std::time::Duration;
use std::time::Instant;

use reqwest::blocking::Client;
use reqwest::header;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;
use tracing::warn;
use url::Url;

use crate::error::message_from_body;
use crate::error::ApiError;
use crate::types::Device;
use crate::types::DeviceId;
use crate::types::ExecuteOutcome;
use crate::types::ExecuteRequest;
use crate::types::ExecuteResponse;
use crate::types::SessionCredentials;
use crate::types::SessionTicket;

pub const API_URL_ENV: &str = "OPCONSOLE_API_URL";
pub const TOKEN_ENV: &str = "OPCONSOLE_TOKEN";
pub const CONNECT_TIMEOUT_ENV: &str = "OPCONSOLE_CONNECT_TIMEOUT";

const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/api/v1";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

const CONNECT_PATH: &str = "operator/connect-device";
const EXECUTE_PATH: &str = "operator/execute";
const DEVICES_PATH: &str = "operator/devices";

const DEFAULT_EXECUTION_FAILURE: &str = "Command execution failed.";

/// Exchanges device id + SSH credentials for a session ticket.
pub trait ConnectionNegotiator: Send + Sync {
    fn connect(&self, credentials: &SessionCredentials) -> Result<SessionTicket, ApiError>;
}

/// Synchronous command execution, also used as an interactive pre-flight check.
pub trait ExecutionGateway: Send + Sync {
    fn execute(&self, device_id: DeviceId, command: &str) -> Result<ExecuteOutcome, ApiError>;
}

/// Devices assigned to the authenticated operator.
pub trait DeviceDirectory: Send + Sync {
    fn list_devices(&self) -> Result<Vec<Device>, ApiError>;

    fn find_device(&self, device_id: DeviceId) -> Result<Option<Device>, ApiError> {
        Ok(self
            .list_devices()?
            .into_iter()
            .find(|device| device.id == device_id))
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    base_url: Url,
    token: Option<String>,
    connect_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ApiConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            token: None,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    pub fn from_env() -> Self {
        let base_url = match env::var(API_URL_ENV) {
            Ok(raw) if !raw.trim().is_empty() => match Url::parse(raw.trim()) {
                Ok(url) => url,
                Err(err) => {
                    warn!(value = %raw, error = %err, "Invalid {API_URL_ENV}; using default");
                    default_api_url()
                }
            },
            _ => default_api_url(),
        };
        let token = env::var(TOKEN_ENV)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let connect_timeout = Duration::from_secs(parse_env_u64(
            CONNECT_TIMEOUT_ENV,
            DEFAULT_CONNECT_TIMEOUT_SECS,
        ));
        Self {
            base_url,
            token,
            connect_timeout,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|value| !value.trim().is_empty());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn default_api_url() -> Url {
    Url::parse(DEFAULT_API_URL)
        .unwrap_or_else(|err| unreachable!("default API URL is valid: {err}"))
}

fn parse_env_u64(key: &str, default: u64) -> u64 {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return default,
    };
    if value.trim().is_empty() {
        return default;
    }
    match value.trim().parse::<u64>() {
        Ok(parsed) => parsed,
        Err(_) => {
            warn!(value = %value, key, "Invalid numeric config; using default");
            default
        }
    }
}

/// `reqwest`-backed implementation of every backend trait.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    config: ApiConfig,
}

impl HttpBackend {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        // No overall timeout: execute waits as long as the backend does.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(None::<Duration>)
            .build()
            .map_err(ApiError::Network)?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        let request = request.header(header::CONTENT_TYPE, "application/json");
        match self.config.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<(StatusCode, String), ApiError> {
        let url = self.config.endpoint(path);
        let started = Instant::now();
        let response = self
            .authorize(self.client.post(&url))
            .json(body)
            .send()
            .map_err(ApiError::Network)?;
        let status = response.status();
        let text = response.text().map_err(ApiError::Network)?;
        debug!(
            url = %url,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "POST completed"
        );
        Ok((status, text))
    }

    fn get(&self, path: &str) -> Result<(StatusCode, String), ApiError> {
        let url = self.config.endpoint(path);
        let started = Instant::now();
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .map_err(ApiError::Network)?;
        let status = response.status();
        let text = response.text().map_err(ApiError::Network)?;
        debug!(
            url = %url,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "GET completed"
        );
        Ok((status, text))
    }
}

impl ConnectionNegotiator for HttpBackend {
    fn connect(&self, credentials: &SessionCredentials) -> Result<SessionTicket, ApiError> {
        credentials.validate()?;
        debug!(device_id = %credentials.device_id(), "Negotiating terminal session");
        let (status, body) = self.post_json(CONNECT_PATH, &credentials.to_request())?;
        connect_result(status, &body)
    }
}

impl ExecutionGateway for HttpBackend {
    fn execute(&self, device_id: DeviceId, command: &str) -> Result<ExecuteOutcome, ApiError> {
        debug!(device_id = %device_id, command, "Executing one-shot command");
        let request = ExecuteRequest { device_id, command };
        let (status, body) = self.post_json(EXECUTE_PATH, &request)?;
        execute_result(status, &body)
    }
}

impl DeviceDirectory for HttpBackend {
    fn list_devices(&self) -> Result<Vec<Device>, ApiError> {
        let (status, body) = self.get(DEVICES_PATH)?;
        devices_result(status, &body)
    }
}

fn fallback_message(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("HTTP {} {}", status.as_u16(), reason),
        None => format!("HTTP {}", status.as_u16()),
    }
}

pub(crate) fn connect_result(status: StatusCode, body: &str) -> Result<SessionTicket, ApiError> {
    if status.is_success() {
        let ticket: SessionTicket =
            serde_json::from_str(body).map_err(|err| ApiError::InvalidResponse {
                message: format!("connect-device response: {err}"),
            })?;
        if ticket.session_id.as_str().trim().is_empty() {
            return Err(ApiError::InvalidResponse {
                message: "backend did not return a session_id".to_string(),
            });
        }
        return Ok(ticket);
    }

    let message = message_from_body(body).unwrap_or_else(|| fallback_message(status));
    let code = status.as_u16();
    Err(match status {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ApiError::Auth {
                status: code,
                message,
            }
        }
        StatusCode::NOT_FOUND
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => ApiError::DeviceUnreachable {
            status: code,
            message,
        },
        _ => ApiError::Status {
            status: code,
            message,
        },
    })
}

pub(crate) fn execute_result(status: StatusCode, body: &str) -> Result<ExecuteOutcome, ApiError> {
    if status == StatusCode::OK {
        let response: ExecuteResponse =
            serde_json::from_str(body).map_err(|err| ApiError::InvalidResponse {
                message: format!("execute response: {err}"),
            })?;
        if response.success {
            return Ok(ExecuteOutcome::Succeeded {
                output: response.output.unwrap_or_default(),
            });
        }
        let message = response
            .message
            .or(response.detail)
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_EXECUTION_FAILURE.to_string());
        return Ok(ExecuteOutcome::Failed {
            status: status.as_u16(),
            message,
        });
    }

    Ok(ExecuteOutcome::Failed {
        status: status.as_u16(),
        message: message_from_body(body).unwrap_or_else(|| fallback_message(status)),
    })
}

pub(crate) fn devices_result(status: StatusCode, body: &str) -> Result<Vec<Device>, ApiError> {
    if status.is_success() {
        return serde_json::from_str(body).map_err(|err| ApiError::InvalidResponse {
            message: format!("devices response: {err}"),
        });
    }
    let message = message_from_body(body).unwrap_or_else(|| fallback_message(status));
    let code = status.as_u16();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Auth {
            status: code,
            message,
        },
        _ => ApiError::Status {
            status: code,
            message,
        },
    })
}
