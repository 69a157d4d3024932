//! Session lifecycle: negotiate, connect, stream, reconnect, close.
//!
//! Every producer (terminal reader, socket pump, gateway workers, reconnect
//! timers, signal thread) posts a [`ControllerEvent`] into one channel. The
//! controller is the only consumer and the only owner of session state, so
//! no handler ever races another.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel as channel;
use crossbeam_channel::Receiver;
use crossbeam_channel::RecvTimeoutError;
use crossbeam_channel::Sender;
use opconsole_api::ApiError;
use opconsole_api::ConnectionNegotiator;
use opconsole_api::Device;
use opconsole_api::ExecuteOutcome;
use opconsole_api::ExecutionGateway;
use opconsole_api::SessionCredentials;
use opconsole_api::SessionId;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::classifier::classify;
use crate::classifier::Dispatch;
use crate::classifier::LineAction;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::keys::CloseDetector;
use crate::session::frames::InboundFrame;
use crate::session::frames::OutboundFrame;
use crate::session::reconnect;
use crate::session::socket::SocketConnector;
use crate::session::socket::SocketEvent;
use crate::session::socket::SocketSink;
use crate::session::Session;
use crate::terminal;
use crate::terminal::SurfaceEvent;
use crate::terminal::SurfaceProvider;

const CANCEL_ECHO: &[u8] = b"^C\r\n";
const LINE_TERMINATOR: &[u8] = b"\n";

#[derive(Debug)]
pub enum ControllerEvent {
    Surface(SurfaceEvent),
    Socket { generation: u64, event: SocketEvent },
    Gateway(GatewayCompletion),
    ReconnectDue { generation: u64 },
    CloseRequested(CloseReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayCall {
    /// Status-only check before a full-screen program is started.
    Preflight,
    /// One-shot execution whose output is rendered locally.
    Execute,
}

#[derive(Debug)]
pub struct GatewayCompletion {
    pub session_id: SessionId,
    pub call: GatewayCall,
    pub line: String,
    pub result: Result<ExecuteOutcome, ApiError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Negotiating,
    Connecting,
    Streaming,
    Closing,
    Terminated,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerState::Idle => "idle",
            ControllerState::Negotiating => "negotiating",
            ControllerState::Connecting => "connecting",
            ControllerState::Streaming => "streaming",
            ControllerState::Closing => "closing",
            ControllerState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The operator pressed the close keys.
    Hotkey,
    /// SIGINT, SIGTERM or SIGHUP.
    Signal,
    /// Closed through the API or by dropping the controller.
    Requested,
    TransportExhausted,
    SurfaceFailed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CloseReason::Hotkey => "closed by operator",
            CloseReason::Signal => "closed by signal",
            CloseReason::Requested => "closed",
            CloseReason::TransportExhausted => "connection lost",
            CloseReason::SurfaceFailed => "terminal input failed",
        };
        f.write_str(text)
    }
}

/// Collaborators the controller drives.
pub struct Collaborators {
    pub negotiator: Arc<dyn ConnectionNegotiator>,
    pub gateway: Arc<dyn ExecutionGateway>,
    pub connector: Box<dyn SocketConnector>,
    pub surfaces: Box<dyn SurfaceProvider>,
}

pub struct LifecycleController {
    state: ControllerState,
    device: Device,
    config: SessionConfig,
    negotiator: Arc<dyn ConnectionNegotiator>,
    gateway: Arc<dyn ExecutionGateway>,
    connector: Box<dyn SocketConnector>,
    surfaces: Box<dyn SurfaceProvider>,
    events_tx: Sender<ControllerEvent>,
    events_rx: Receiver<ControllerEvent>,
    session: Option<Session>,
    close_detector: CloseDetector,
    close_reason: Option<CloseReason>,
}

impl LifecycleController {
    pub fn new(device: Device, config: SessionConfig, collaborators: Collaborators) -> Self {
        let (events_tx, events_rx) = channel::unbounded();
        let close_detector = CloseDetector::new(&config.close_keys);
        Self {
            state: ControllerState::Idle,
            device,
            config,
            negotiator: collaborators.negotiator,
            gateway: collaborators.gateway,
            connector: collaborators.connector,
            surfaces: collaborators.surfaces,
            events_tx,
            events_rx,
            session: None,
            close_detector,
            close_reason: None,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    /// A sender for posting events from other threads (signals, tests).
    pub fn events(&self) -> Sender<ControllerEvent> {
        self.events_tx.clone()
    }

    /// Negotiates a session and, on success, opens the terminal and the socket.
    ///
    /// A failed negotiation leaves the controller `Idle` with nothing opened.
    pub fn submit_credentials(
        &mut self,
        credentials: SessionCredentials,
    ) -> Result<(), SessionError> {
        if self.state != ControllerState::Idle {
            return Err(SessionError::InvalidState {
                operation: "submit credentials",
                state: self.state.to_string(),
            });
        }
        if credentials.device_id() != self.device.id {
            return Err(SessionError::InvalidCredentials {
                message: format!(
                    "credentials are for device {}, not {}",
                    credentials.device_id(),
                    self.device.id
                ),
            });
        }
        credentials
            .validate()
            .map_err(|err| SessionError::InvalidCredentials {
                message: err.to_string(),
            })?;

        self.state = ControllerState::Negotiating;
        debug!(device_id = %self.device.id, "Negotiating session");
        let ticket = match self.negotiator.connect(&credentials) {
            Ok(ticket) => ticket,
            Err(err) => {
                warn!(device_id = %self.device.id, error = %err, "Negotiation failed");
                self.state = ControllerState::Idle;
                return Err(err.into());
            }
        };

        let mut surface = match self.surfaces.open(self.events_tx.clone()) {
            Ok(surface) => surface,
            Err(err) => {
                self.state = ControllerState::Idle;
                return Err(err);
            }
        };
        info!(
            session_id = %ticket.session_id,
            device_id = %self.device.id,
            "Session negotiated"
        );
        write_surface(
            surface.as_mut(),
            terminal::device_banner(&self.device).as_bytes(),
        );
        surface.focus();

        self.session = Some(Session::new(
            ticket.session_id,
            self.device.clone(),
            credentials,
            surface,
            self.config.reconnect,
        ));
        self.state = ControllerState::Connecting;
        self.open_socket();

        if let Some(command) = self.config.open_command.clone() {
            self.spawn_gateway_call(GatewayCall::Execute, command);
        }
        Ok(())
    }

    /// Closes the session on request. Safe to call in any state.
    pub fn close(&mut self) {
        self.close_with(CloseReason::Requested);
    }

    /// Waits up to `timeout` for the next event without handling it.
    pub fn poll_event(&self, timeout: Duration) -> Option<ControllerEvent> {
        self.events_rx.recv_timeout(timeout).ok()
    }

    /// Handles queued events until none arrives for `idle`. Returns how many ran.
    pub fn process_pending(&mut self, idle: Duration) -> usize {
        let mut handled = 0;
        while let Some(event) = self.poll_event(idle) {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Runs the event loop until the session terminates.
    pub fn run(&mut self) -> CloseReason {
        while self.state != ControllerState::Terminated {
            match self.events_rx.recv_timeout(Duration::from_millis(250)) {
                Ok(event) => self.handle_event(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => self.close_with(CloseReason::Requested),
            }
        }
        self.close_reason.unwrap_or(CloseReason::Requested)
    }

    pub fn handle_event(&mut self, event: ControllerEvent) {
        if self.state == ControllerState::Terminated {
            debug!(event = ?event, "Ignoring event after termination");
            return;
        }
        match event {
            ControllerEvent::Surface(SurfaceEvent::Input(bytes)) => self.on_surface_input(&bytes),
            ControllerEvent::Surface(SurfaceEvent::Resize { cols, rows }) => {
                self.on_resize(cols, rows)
            }
            ControllerEvent::Surface(SurfaceEvent::Failed { reason }) => {
                warn!(reason = %reason, "Terminal input failed");
                self.close_with(CloseReason::SurfaceFailed);
            }
            ControllerEvent::Socket { generation, event } => {
                self.on_socket_event(generation, event)
            }
            ControllerEvent::Gateway(completion) => self.on_gateway_completion(completion),
            ControllerEvent::ReconnectDue { generation } => self.on_reconnect_due(generation),
            ControllerEvent::CloseRequested(reason) => self.close_with(reason),
        }
    }

    fn open_socket(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let generation = session.next_generation();
        debug!(session_id = %session.id(), generation, "Opening socket");
        let sink = SocketSink::new(generation, self.events_tx.clone());
        match self.connector.open(session.id(), sink) {
            Ok(handle) => session.attach_socket(handle),
            Err(err) => {
                warn!(generation, error = %err, "Socket open failed");
                self.on_transport_lost(Some(err.to_string()));
            }
        }
    }

    fn on_socket_event(&mut self, generation: u64, event: SocketEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.is_current(generation) {
            debug!(generation, current = session.generation(), "Ignoring stale socket event");
            return;
        }
        match event {
            SocketEvent::Opened => self.on_socket_opened(),
            SocketEvent::Frame(InboundFrame::Data { bytes }) => {
                if session.reconnect_mut().confirm() {
                    debug!(generation, "Connection healthy, reconnect budget restored");
                }
                self.write(&bytes)
            }
            SocketEvent::Frame(InboundFrame::Error { reason }) => {
                warn!(generation, reason = %reason, "Gateway reported an error");
                self.write(terminal::error_line(&format!("error: {reason}")).as_bytes());
            }
            SocketEvent::Frame(InboundFrame::Disconnect) => self.on_socket_lost(generation, None),
            SocketEvent::Closed { reason } => self.on_socket_lost(generation, reason),
        }
    }

    /// A gateway hang-up usually arrives as a `disconnect` frame followed by
    /// the close; only the first report for a generation counts.
    fn on_socket_lost(&mut self, generation: u64, reason: Option<String>) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if !session.has_socket() {
            debug!(generation, reason = ?reason, "Loss already handled for this connection");
            return;
        }
        self.on_transport_lost(reason);
    }

    fn on_socket_opened(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.mark_socket_open();
        session.reconnect_mut().arm();
        let (cols, rows) = session.surface_size().unwrap_or((80, 24));
        let start = OutboundFrame::start(session.device(), session.credentials());
        info!(session_id = %session.id(), generation = session.generation(), "Socket connected");

        let sent = match session.socket_mut() {
            Some(socket) => socket
                .send(start)
                .and_then(|()| socket.send(OutboundFrame::Resize { cols, rows })),
            None => Err(SessionError::Transport {
                reason: "socket handle missing".to_string(),
            }),
        };
        if let Err(err) = sent {
            self.on_transport_lost(Some(err.to_string()));
            return;
        }
        self.write(terminal::status_line("connected").as_bytes());
        self.state = ControllerState::Streaming;
    }

    fn on_transport_lost(&mut self, reason: Option<String>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.release_socket();
        let generation = session.generation();
        let next = session.reconnect_mut().next_attempt();
        let max_attempts = session.reconnect_mut().max_attempts();
        warn!(generation, reason = ?reason, "Socket connection lost");

        let lost = match &reason {
            Some(reason) => format!("connection lost: {reason}"),
            None => "connection lost".to_string(),
        };
        self.write(terminal::status_line(&lost).as_bytes());

        let Some((attempt, delay)) = next else {
            let err = SessionError::ReconnectExhausted {
                attempts: max_attempts,
            };
            self.write(terminal::error_line(&err.to_string()).as_bytes());
            self.close_with(CloseReason::TransportExhausted);
            return;
        };

        info!(generation, attempt, max_attempts, "Scheduling reconnect");
        self.write(
            terminal::status_line(&format!("reconnecting ({attempt}/{max_attempts})")).as_bytes(),
        );
        self.state = ControllerState::Connecting;
        let due = ControllerEvent::ReconnectDue { generation };
        if let Err(err) = reconnect::schedule(delay, self.events_tx.clone(), due) {
            warn!(error = %err, "Failed to schedule reconnect");
            self.close_with(CloseReason::TransportExhausted);
        }
    }

    fn on_reconnect_due(&mut self, generation: u64) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if !session.is_current(generation) || session.has_socket() {
            debug!(generation, "Ignoring stale reconnect timer");
            return;
        }
        self.open_socket();
    }

    fn on_surface_input(&mut self, bytes: &[u8]) {
        let (forward, close) = self.close_detector.consume(bytes);
        if !forward.is_empty() {
            self.on_input(&forward);
        }
        if close {
            self.close_with(CloseReason::Hotkey);
        }
    }

    fn on_input(&mut self, bytes: &[u8]) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.is_live() {
            return;
        }
        if session.is_interactive() {
            self.send_data(bytes.to_vec());
            return;
        }
        let actions = session.editor_mut().feed(bytes);
        for action in actions {
            match action {
                LineAction::Echo(text) => self.write(text.as_bytes()),
                LineAction::Erase => self.write(terminal::ERASE_SEQUENCE),
                LineAction::Cancel => self.write(CANCEL_ECHO),
                LineAction::Submit(line) => {
                    self.write(b"\r\n");
                    self.dispatch_line(&line);
                }
            }
        }
    }

    fn dispatch_line(&mut self, raw: &str) {
        let interactive = self
            .session
            .as_ref()
            .is_some_and(|session| session.is_interactive());
        let line = raw.trim();
        match classify(line, interactive) {
            Dispatch::Passthrough => self.send_data(LINE_TERMINATOR.to_vec()),
            Dispatch::Interactive => {
                self.spawn_gateway_call(GatewayCall::Preflight, line.to_string())
            }
            Dispatch::ValidateThenExecute => {
                self.spawn_gateway_call(GatewayCall::Execute, line.to_string())
            }
        }
    }

    fn send_data(&mut self, bytes: Vec<u8>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.socket_open() {
            debug!(len = bytes.len(), "Dropping input while disconnected");
            return;
        }
        let result = match session.socket_mut() {
            Some(socket) => socket.send(OutboundFrame::data(bytes)),
            None => return,
        };
        if let Err(err) = result {
            self.on_transport_lost(Some(err.to_string()));
        }
    }

    fn on_resize(&mut self, cols: u16, rows: u16) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.socket_open() {
            return;
        }
        let result = match session.socket_mut() {
            Some(socket) => socket.send(OutboundFrame::Resize { cols, rows }),
            None => return,
        };
        if let Err(err) = result {
            debug!(error = %err, "Resize not delivered");
        }
    }

    fn spawn_gateway_call(&mut self, call: GatewayCall, line: String) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let session_id = session.id().clone();
        let device_id = session.device().id;
        let gateway = Arc::clone(&self.gateway);
        let events = self.events_tx.clone();
        debug!(session_id = %session_id, call = ?call, command = %line, "Dispatching to gateway");
        let spawned = thread::Builder::new()
            .name("opconsole-gateway".to_string())
            .spawn(move || {
                let result = gateway.execute(device_id, &line);
                let _ = events.send(ControllerEvent::Gateway(GatewayCompletion {
                    session_id,
                    call,
                    line,
                    result,
                }));
            });
        if let Err(err) = spawned {
            self.write(terminal::error_line(&format!("failed to run command: {err}")).as_bytes());
        }
    }

    fn on_gateway_completion(&mut self, completion: GatewayCompletion) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if !session.is_live() || session.id() != &completion.session_id {
            debug!(session_id = %completion.session_id, "Ignoring completion for closed session");
            return;
        }
        let GatewayCompletion {
            call, line, result, ..
        } = completion;
        match (call, result) {
            (_, Err(err)) => {
                warn!(command = %line, error = %err, "Gateway call failed");
                let message = format!("API connection error: {err}");
                self.write(terminal::error_line(&message).as_bytes());
            }
            (GatewayCall::Execute, Ok(ExecuteOutcome::Succeeded { output })) => {
                self.write(terminal::success_block(&output).as_bytes());
            }
            (GatewayCall::Execute, Ok(ExecuteOutcome::Failed { message, .. })) => {
                let err = SessionError::ExecutionFailed { message };
                debug!(command = %line, error = %err, "Command failed");
                self.write(terminal::error_line(&err.to_string()).as_bytes());
            }
            (GatewayCall::Preflight, Ok(outcome)) if outcome.is_accepted() => {
                self.start_interactive(line);
            }
            (GatewayCall::Preflight, Ok(outcome)) => {
                let err = SessionError::ValidationRejected {
                    command: line,
                    message: outcome.failure_message().unwrap_or_default().to_string(),
                };
                self.write(terminal::error_line(&err.to_string()).as_bytes());
            }
        }
    }

    fn start_interactive(&mut self, line: String) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.is_interactive() {
            return;
        }
        if !session.socket_open() {
            let message = format!("not connected; '{line}' was not started");
            self.write(terminal::error_line(&message).as_bytes());
            return;
        }
        let result = match session.socket_mut() {
            Some(socket) => socket.send(OutboundFrame::InteractiveCommand { text: line.clone() }),
            None => return,
        };
        match result {
            Ok(()) => {
                info!(session_id = %session.id(), command = %line, "Entering interactive mode");
                session.enter_interactive();
            }
            Err(err) => self.on_transport_lost(Some(err.to_string())),
        }
    }

    fn close_with(&mut self, reason: CloseReason) {
        if matches!(
            self.state,
            ControllerState::Closing | ControllerState::Terminated
        ) {
            return;
        }
        let previous = self.state;
        self.state = ControllerState::Closing;
        self.close_reason = Some(reason);
        if let Some(session) = self.session.as_mut() {
            if matches!(reason, CloseReason::Hotkey | CloseReason::Signal) {
                if let Some(surface) = session.surface_mut() {
                    write_surface(surface, terminal::status_line(&reason.to_string()).as_bytes());
                }
            }
            info!(
                session_id = %session.id(),
                reason = %reason,
                from = %previous,
                "Closing session"
            );
            session.teardown();
        }
        self.state = ControllerState::Terminated;
    }

    fn write(&mut self, bytes: &[u8]) {
        if let Some(surface) = self.session.as_mut().and_then(Session::surface_mut) {
            write_surface(surface, bytes);
        }
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        self.close_with(CloseReason::Requested);
    }
}

fn write_surface(surface: &mut dyn terminal::TerminalSurface, bytes: &[u8]) {
    if let Err(err) = surface.write(bytes) {
        debug!(error = %err, "Terminal write failed");
    }
}
