//! Per-window session state: the socket and terminal it owns, plus the
//! line-mode and interactive-mode bookkeeping.

pub mod frames;
pub mod reconnect;
pub mod socket;

use opconsole_api::Device;
use opconsole_api::SessionCredentials;
use opconsole_api::SessionId;
use tracing::debug;

use crate::classifier::LineEditor;
use crate::terminal::TerminalSurface;

pub use frames::InboundFrame;
pub use frames::OutboundFrame;
pub use reconnect::ReconnectPolicy;
pub use reconnect::ReconnectTracker;
pub use socket::SocketConnector;
pub use socket::SocketEvent;
pub use socket::SocketHandle;
pub use socket::SocketSink;
pub use socket::WsConnector;

/// One negotiated session.
///
/// Owns the socket handle and the terminal surface exclusively; both are
/// released together by [`Session::teardown`] (socket first), exactly once.
pub struct Session {
    id: SessionId,
    device: Device,
    credentials: SessionCredentials,
    socket: Option<Box<dyn SocketHandle>>,
    surface: Option<Box<dyn TerminalSurface>>,
    editor: LineEditor,
    interactive: bool,
    generation: u64,
    socket_open: bool,
    reconnect: ReconnectTracker,
    live: bool,
}

impl Session {
    pub fn new(
        id: SessionId,
        device: Device,
        credentials: SessionCredentials,
        surface: Box<dyn TerminalSurface>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            id,
            device,
            credentials,
            socket: None,
            surface: Some(surface),
            editor: LineEditor::new(),
            interactive: false,
            generation: 0,
            socket_open: false,
            reconnect: ReconnectTracker::new(policy),
            live: true,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn credentials(&self) -> &SessionCredentials {
        &self.credentials
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Interactive mode is one-way for the lifetime of the session.
    pub fn enter_interactive(&mut self) {
        self.interactive = true;
        self.editor.reset();
    }

    pub fn editor_mut(&mut self) -> &mut LineEditor {
        &mut self.editor
    }

    pub fn editor(&self) -> &LineEditor {
        &self.editor
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Starts a new connection generation; events tagged with older ones are stale.
    pub fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.live && generation == self.generation
    }

    pub fn reconnect_mut(&mut self) -> &mut ReconnectTracker {
        &mut self.reconnect
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect.attempts()
    }

    pub fn socket_open(&self) -> bool {
        self.socket_open && self.socket.is_some()
    }

    pub fn has_socket(&self) -> bool {
        self.socket.is_some()
    }

    pub fn attach_socket(&mut self, socket: Box<dyn SocketHandle>) {
        self.release_socket();
        self.socket = Some(socket);
        self.socket_open = false;
    }

    pub fn mark_socket_open(&mut self) {
        self.socket_open = true;
    }

    /// Drops the current socket after a transport loss; the session stays live.
    pub fn release_socket(&mut self) {
        self.socket_open = false;
        if let Some(mut socket) = self.socket.take() {
            socket.disconnect();
        }
    }

    pub fn socket_mut(&mut self) -> Option<&mut (dyn SocketHandle + 'static)> {
        self.socket.as_deref_mut()
    }

    pub fn surface_mut(&mut self) -> Option<&mut (dyn TerminalSurface + 'static)> {
        if !self.live {
            return None;
        }
        self.surface.as_deref_mut()
    }

    pub fn surface_size(&self) -> Option<(u16, u16)> {
        self.surface.as_deref().map(|surface| surface.size())
    }

    /// Disconnects the socket, then disposes the surface.
    ///
    /// Returns `false` when the session was already torn down.
    pub fn teardown(&mut self) -> bool {
        if !self.live {
            return false;
        }
        self.live = false;
        debug!(session_id = %self.id, generation = self.generation, "Tearing down session");
        self.socket_open = false;
        if let Some(mut socket) = self.socket.take() {
            socket.disconnect();
        }
        if let Some(mut surface) = self.surface.take() {
            surface.dispose();
        }
        true
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("device_id", &self.device.id)
            .field("interactive", &self.interactive)
            .field("generation", &self.generation)
            .field("socket_open", &self.socket_open)
            .field("live", &self.live)
            .finish()
    }
}
