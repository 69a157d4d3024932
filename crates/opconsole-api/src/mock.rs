use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use opconsole_common::mutex_lock_or_recover;

use crate::client::ConnectionNegotiator;
use crate::client::DeviceDirectory;
use crate::client::ExecutionGateway;
use crate::error::ApiError;
use crate::types::Device;
use crate::types::DeviceId;
use crate::types::ExecuteOutcome;
use crate::types::SessionCredentials;
use crate::types::SessionId;
use crate::types::SessionTicket;

/// Scripted reply for a mocked backend call.
#[derive(Debug, Clone)]
pub enum MockReply<T> {
    Ok(T),
    /// Fails with `ApiError::Auth`.
    AuthFailed(String),
    /// Fails with `ApiError::DeviceUnreachable`.
    Unreachable(String),
    /// Fails with `ApiError::InvalidResponse`, standing in for a transport failure.
    Broken(String),
}

impl<T> MockReply<T> {
    fn into_result(self) -> Result<T, ApiError> {
        match self {
            MockReply::Ok(value) => Ok(value),
            MockReply::AuthFailed(message) => Err(ApiError::Auth {
                status: 401,
                message,
            }),
            MockReply::Unreachable(message) => Err(ApiError::DeviceUnreachable {
                status: 502,
                message,
            }),
            MockReply::Broken(message) => Err(ApiError::InvalidResponse { message }),
        }
    }
}

#[derive(Default)]
struct MockState {
    connect_replies: VecDeque<MockReply<SessionTicket>>,
    execute_replies: VecDeque<MockReply<ExecuteOutcome>>,
    devices: Vec<Device>,
    connect_calls: Vec<SessionCredentials>,
    execute_calls: Vec<(DeviceId, String)>,
    session_counter: u64,
}

/// In-memory backend for tests.
///
/// Unscripted `connect` calls succeed with a fresh `mock-session-N` id;
/// unscripted `execute` calls succeed with empty output. Every call is
/// recorded for later assertions.
///
/// ```ignore
/// let backend = MockBackend::new();
/// backend.push_execute(MockReply::Ok(ExecuteOutcome::Succeeded { output: "ok".into() }));
/// assert!(backend.execute(DeviceId(1), "uptime").unwrap().is_success());
/// assert_eq!(backend.execute_count(), 1);
/// ```
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: Vec<Device>) -> Self {
        let backend = Self::new();
        mutex_lock_or_recover(&backend.state).devices = devices;
        backend
    }

    pub fn push_connect(&self, reply: MockReply<SessionTicket>) {
        mutex_lock_or_recover(&self.state)
            .connect_replies
            .push_back(reply);
    }

    pub fn push_execute(&self, reply: MockReply<ExecuteOutcome>) {
        mutex_lock_or_recover(&self.state)
            .execute_replies
            .push_back(reply);
    }

    pub fn push_output(&self, output: &str) {
        self.push_execute(MockReply::Ok(ExecuteOutcome::Succeeded {
            output: output.to_string(),
        }));
    }

    pub fn push_failure(&self, message: &str) {
        self.push_execute(MockReply::Ok(ExecuteOutcome::Failed {
            status: 200,
            message: message.to_string(),
        }));
    }

    pub fn connect_count(&self) -> usize {
        mutex_lock_or_recover(&self.state).connect_calls.len()
    }

    pub fn connect_calls(&self) -> Vec<SessionCredentials> {
        mutex_lock_or_recover(&self.state).connect_calls.clone()
    }

    pub fn execute_count(&self) -> usize {
        mutex_lock_or_recover(&self.state).execute_calls.len()
    }

    pub fn execute_calls(&self) -> Vec<(DeviceId, String)> {
        mutex_lock_or_recover(&self.state).execute_calls.clone()
    }

    pub fn executed_commands(&self) -> Vec<String> {
        self.execute_calls()
            .into_iter()
            .map(|(_, command)| command)
            .collect()
    }
}

impl ConnectionNegotiator for MockBackend {
    fn connect(&self, credentials: &SessionCredentials) -> Result<SessionTicket, ApiError> {
        credentials.validate()?;
        let mut state = mutex_lock_or_recover(&self.state);
        state.connect_calls.push(credentials.clone());
        match state.connect_replies.pop_front() {
            Some(reply) => reply.into_result(),
            None => {
                state.session_counter += 1;
                Ok(SessionTicket {
                    session_id: SessionId::new(format!("mock-session-{}", state.session_counter)),
                })
            }
        }
    }
}

impl ExecutionGateway for MockBackend {
    fn execute(&self, device_id: DeviceId, command: &str) -> Result<ExecuteOutcome, ApiError> {
        let mut state = mutex_lock_or_recover(&self.state);
        state.execute_calls.push((device_id, command.to_string()));
        match state.execute_replies.pop_front() {
            Some(reply) => reply.into_result(),
            None => Ok(ExecuteOutcome::Succeeded {
                output: String::new(),
            }),
        }
    }
}

impl DeviceDirectory for MockBackend {
    fn list_devices(&self) -> Result<Vec<Device>, ApiError> {
        Ok(mutex_lock_or_recover(&self.state).devices.clone())
    }
}
