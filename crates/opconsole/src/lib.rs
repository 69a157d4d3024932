#![deny(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod app;
pub mod classifier;
pub mod config;
pub mod controller;
pub mod error;
pub mod keys;
pub mod session;
pub mod signals;
pub mod terminal;

pub use app::Application;

pub use classifier::classify;
pub use classifier::Dispatch;
pub use classifier::LineEditor;
pub use classifier::PendingCommand;
pub use config::SessionConfig;
pub use controller::CloseReason;
pub use controller::Collaborators;
pub use controller::ControllerEvent;
pub use controller::ControllerState;
pub use controller::LifecycleController;
pub use error::SessionError;
pub use keys::CloseKeys;
pub use session::Session;
pub use terminal::SurfaceEvent;
pub use terminal::SurfaceProvider;
pub use terminal::TerminalSurface;
