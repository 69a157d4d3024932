//! Wire types for the operator backend.

use std::fmt;

use chrono::DateTime;
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde::Serialize;

use crate::error::ApiError;

/// SSH port assumed when the backend leaves `ssh_port` empty.
pub const DEFAULT_SSH_PORT: u16 = 2001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DeviceId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(DeviceId)
    }
}

/// A device assigned to the authenticated operator. Owned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub hostname: String,
    pub ip_address: String,
    #[serde(default)]
    pub ssh_port: Option<u16>,
    #[serde(default)]
    pub os_type: String,
    #[serde(default, alias = "device_group_id")]
    pub group_id: Option<u64>,
    #[serde(default, alias = "device_group_name")]
    pub group_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Device {
    pub fn port(&self) -> u16 {
        self.ssh_port.unwrap_or(DEFAULT_SSH_PORT)
    }

    pub fn group_label(&self) -> String {
        match (&self.group_name, self.group_id) {
            (Some(name), _) if !name.trim().is_empty() => name.clone(),
            (_, Some(id)) => format!("group {id}"),
            _ => "ungrouped".to_string(),
        }
    }

    /// Creation time as `dd/mm/YYYY HH:MM`, or `-` when absent or unparseable.
    pub fn created_at_display(&self) -> String {
        self.created_at
            .as_deref()
            .and_then(format_timestamp)
            .unwrap_or_else(|| "-".to_string())
    }
}

fn format_timestamp(raw: &str) -> Option<String> {
    const DISPLAY: &str = "%d/%m/%Y %H:%M";
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.format(DISPLAY).to_string());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|parsed| parsed.format(DISPLAY).to_string())
}

/// Opaque session token issued by the backend for one terminal window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionTicket {
    pub session_id: SessionId,
}

/// SSH credentials supplied by the operator for a single negotiation.
///
/// Never persisted; `Debug` output redacts the password.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    device_id: DeviceId,
    username: String,
    password: String,
}

impl SessionCredentials {
    pub fn new(device_id: DeviceId, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            device_id,
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        if self.username.trim().is_empty() {
            return Err(ApiError::InvalidRequest {
                message: "SSH username is required".to_string(),
            });
        }
        if self.password.is_empty() {
            return Err(ApiError::InvalidRequest {
                message: "SSH password is required".to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn to_request(&self) -> ConnectRequest<'_> {
        ConnectRequest {
            device_id: self.device_id,
            username: &self.username,
            password: &self.password,
        }
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("device_id", &self.device_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ConnectRequest<'a> {
    pub device_id: DeviceId,
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ExecuteRequest<'a> {
    pub device_id: DeviceId,
    pub command: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExecuteResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Result of one `/operator/execute` round trip that reached the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteOutcome {
    Succeeded { output: String },
    Failed { status: u16, message: String },
}

impl ExecuteOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecuteOutcome::Succeeded { .. })
    }

    /// Whether the backend accepted the request at the HTTP level, whatever
    /// the body said. Pre-flight checks look only at this.
    pub fn is_accepted(&self) -> bool {
        match self {
            ExecuteOutcome::Succeeded { .. } => true,
            ExecuteOutcome::Failed { status, .. } => (200..300).contains(status),
        }
    }

    pub fn output(&self) -> Option<&str> {
        match self {
            ExecuteOutcome::Succeeded { output } => Some(output),
            ExecuteOutcome::Failed { .. } => None,
        }
    }

    pub fn failure_message(&self) -> Option<&str> {
        match self {
            ExecuteOutcome::Succeeded { .. } => None,
            ExecuteOutcome::Failed { message, .. } => Some(message),
        }
    }
}
