#![deny(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod client;
pub mod error;
pub mod mock;
pub mod types;

pub use client::ApiConfig;
pub use client::ConnectionNegotiator;
pub use client::DeviceDirectory;
pub use client::ExecutionGateway;
pub use client::HttpBackend;
pub use error::ApiError;
pub use mock::MockBackend;
pub use mock::MockReply;
pub use types::Device;
pub use types::DeviceId;
pub use types::ExecuteOutcome;
pub use types::SessionCredentials;
pub use types::SessionId;
pub use types::SessionTicket;
