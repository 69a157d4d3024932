#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

//! Recording collaborators and loopback servers shared by the integration tests.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Read;
use std::io::Write;
use std::net::SocketAddr;
use std::net::TcpListener;
use std::net::TcpStream;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use assert_cmd::Command;
use crossbeam_channel::Sender;
use opconsole::controller::Collaborators;
use opconsole::controller::ControllerEvent;
use opconsole::controller::ControllerState;
use opconsole::controller::LifecycleController;
use opconsole::session::OutboundFrame;
use opconsole::session::ReconnectPolicy;
use opconsole::session::SocketConnector;
use opconsole::session::SocketEvent;
use opconsole::session::SocketHandle;
use opconsole::session::SocketSink;
use opconsole::terminal::SurfaceEvent;
use opconsole::terminal::SurfaceProvider;
use opconsole::terminal::TerminalSurface;
use opconsole::CloseKeys;
use opconsole::SessionConfig;
use opconsole::SessionError;
use opconsole_api::Device;
use opconsole_api::DeviceId;
use opconsole_api::MockBackend;
use opconsole_api::SessionCredentials;
use opconsole_api::SessionId;
use serde_json::Value;
use tungstenite::handshake::server::ErrorResponse;
use tungstenite::handshake::server::Request;
use tungstenite::handshake::server::Response;
use tungstenite::Message;
use url::Url;

pub const SETTLE: Duration = Duration::from_millis(150);

/// What the recording connector does on its next `open`.
#[derive(Debug, Clone)]
pub enum OpenScript {
    /// Report `Opened` on the sink.
    Open,
    /// Hand out a handle but report `Closed` straight away.
    Refuse(String),
    /// Fail the `open` call itself.
    Fail(String),
}

#[derive(Default)]
struct RecorderState {
    calls: Vec<String>,
    frames: Vec<OutboundFrame>,
    written: Vec<u8>,
    sinks: Vec<SocketSink>,
    scripts: VecDeque<OpenScript>,
    fail_sends: bool,
}

/// Shared log of everything the fake socket and surface see, in call order.
#[derive(Clone, Default)]
pub struct Recorder {
    state: Arc<Mutex<RecorderState>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_open(&self, script: OpenScript) {
        self.state.lock().unwrap().scripts.push_back(script);
    }

    pub fn fail_sends(&self) {
        self.state.lock().unwrap().fail_sends = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    pub fn frames(&self) -> Vec<OutboundFrame> {
        self.state.lock().unwrap().frames.clone()
    }

    pub fn frames_named(&self, event: &str) -> Vec<OutboundFrame> {
        self.frames()
            .into_iter()
            .filter(|frame| frame.event_name() == event)
            .collect()
    }

    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().unwrap().written).to_string()
    }

    pub fn clear_written(&self) {
        self.state.lock().unwrap().written.clear();
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().sinks.len()
    }

    /// Sink of the most recent connection, for injecting gateway traffic.
    pub fn last_sink(&self) -> SocketSink {
        self.state.lock().unwrap().sinks.last().cloned().unwrap()
    }

    pub fn sink(&self, index: usize) -> SocketSink {
        self.state.lock().unwrap().sinks[index].clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.state.lock().unwrap().calls.push(call.into());
    }
}

pub struct RecordingSocket {
    recorder: Recorder,
}

impl SocketHandle for RecordingSocket {
    fn send(&mut self, frame: OutboundFrame) -> Result<(), SessionError> {
        let mut state = self.recorder.state.lock().unwrap();
        if state.fail_sends {
            return Err(SessionError::Transport {
                reason: "send refused".into(),
            });
        }
        state.calls.push(format!("socket.send:{}", frame.event_name()));
        state.frames.push(frame);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.recorder.record("socket.disconnect");
    }
}

pub struct RecordingConnector {
    recorder: Recorder,
}

impl RecordingConnector {
    pub fn new(recorder: &Recorder) -> Self {
        Self {
            recorder: recorder.clone(),
        }
    }
}

impl SocketConnector for RecordingConnector {
    fn open(
        &self,
        session_id: &SessionId,
        sink: SocketSink,
    ) -> Result<Box<dyn SocketHandle>, SessionError> {
        let script = {
            let mut state = self.recorder.state.lock().unwrap();
            state.calls.push(format!("socket.open:{session_id}"));
            state.sinks.push(sink.clone());
            state.scripts.pop_front().unwrap_or(OpenScript::Open)
        };
        match script {
            OpenScript::Open => {
                sink.emit(SocketEvent::Opened);
            }
            OpenScript::Refuse(reason) => {
                sink.emit(SocketEvent::Closed {
                    reason: Some(reason),
                });
            }
            OpenScript::Fail(reason) => return Err(SessionError::Transport { reason }),
        }
        Ok(Box::new(RecordingSocket {
            recorder: self.recorder.clone(),
        }))
    }
}

pub struct RecordingSurface {
    recorder: Recorder,
    size: (u16, u16),
}

impl TerminalSurface for RecordingSurface {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.recorder
            .state
            .lock()
            .unwrap()
            .written
            .extend_from_slice(bytes);
        Ok(())
    }

    fn size(&self) -> (u16, u16) {
        self.size
    }

    fn focus(&mut self) {
        self.recorder.record("surface.focus");
    }

    fn dispose(&mut self) {
        self.recorder.record("surface.dispose");
    }
}

pub struct RecordingSurfaces {
    recorder: Recorder,
    size: (u16, u16),
}

impl RecordingSurfaces {
    pub fn new(recorder: &Recorder) -> Self {
        Self {
            recorder: recorder.clone(),
            size: (120, 40),
        }
    }
}

impl SurfaceProvider for RecordingSurfaces {
    fn open(
        &mut self,
        _events: Sender<ControllerEvent>,
    ) -> Result<Box<dyn TerminalSurface>, SessionError> {
        self.recorder.record("surface.open");
        Ok(Box::new(RecordingSurface {
            recorder: self.recorder.clone(),
            size: self.size,
        }))
    }
}

pub fn device() -> Device {
    Device {
        id: DeviceId(7),
        hostname: "core-sw-7".into(),
        ip_address: "192.0.2.7".into(),
        ssh_port: Some(2222),
        os_type: "linux".into(),
        group_id: Some(3),
        group_name: Some("core".into()),
        created_at: Some("2024-05-01T08:30:00Z".into()),
    }
}

pub fn credentials() -> SessionCredentials {
    SessionCredentials::new(DeviceId(7), "admin", "s3cret")
}

pub fn config(policy: ReconnectPolicy) -> SessionConfig {
    SessionConfig::from_lookup(|_| None)
        .with_socket_url(Url::parse("ws://127.0.0.1:9/ws").unwrap())
        .with_reconnect(policy)
        .with_close_keys(CloseKeys::default())
}

pub fn controller(
    backend: &MockBackend,
    recorder: &Recorder,
    config: SessionConfig,
) -> LifecycleController {
    LifecycleController::new(
        device(),
        config,
        Collaborators {
            negotiator: Arc::new(backend.clone()),
            gateway: Arc::new(backend.clone()),
            connector: Box::new(RecordingConnector::new(recorder)),
            surfaces: Box::new(RecordingSurfaces::new(recorder)),
        },
    )
}

/// Negotiates and drains events until the session is streaming.
pub fn streaming_controller(
    backend: &MockBackend,
    recorder: &Recorder,
    policy: ReconnectPolicy,
) -> LifecycleController {
    let mut controller = controller(backend, recorder, config(policy));
    controller.submit_credentials(credentials()).unwrap();
    controller.process_pending(SETTLE);
    assert_eq!(controller.state(), ControllerState::Streaming);
    controller
}

pub fn input(controller: &mut LifecycleController, bytes: &[u8]) {
    controller.handle_event(ControllerEvent::Surface(SurfaceEvent::Input(bytes.to_vec())));
}

/// Types `line` followed by Enter and waits for the resulting work to settle.
pub fn type_line(controller: &mut LifecycleController, line: &str) {
    let mut bytes = line.as_bytes().to_vec();
    bytes.push(b'\r');
    input(controller, &bytes);
    controller.process_pending(SETTLE);
}

/// Handles events until `done` holds or `timeout` passes.
pub fn drive_until(
    controller: &mut LifecycleController,
    timeout: Duration,
    done: impl Fn(&LifecycleController) -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done(controller) {
            return true;
        }
        if let Some(event) = controller.poll_event(Duration::from_millis(20)) {
            controller.handle_event(event);
        }
    }
    done(controller)
}

pub fn opconsole_cmd() -> Command {
    let mut cmd = Command::cargo_bin("opconsole").unwrap();
    cmd.env_remove("OPCONSOLE_API_URL")
        .env_remove("OPCONSOLE_TOKEN")
        .env_remove("OPCONSOLE_SOCKET_URL")
        .env_remove("OPCONSOLE_LOG")
        .env("NO_COLOR", "1");
    cmd
}

/// A port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Loopback terminal gateway speaking the JSON frame protocol.
///
/// Records every text frame it receives and answers each `start` frame
/// with the configured replies.
pub struct MockGateway {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Value>>>,
    uris: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<usize>>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MockGateway {
    pub fn start(replies: Vec<Value>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let uris = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(Mutex::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_received = Arc::clone(&received);
        let thread_uris = Arc::clone(&uris);
        let thread_closed = Arc::clone(&closed);
        let thread_shutdown = Arc::clone(&shutdown);
        let handle = thread::spawn(move || {
            for stream in listener.incoming() {
                if thread_shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(stream) = stream else { continue };
                let received = Arc::clone(&thread_received);
                let uris = Arc::clone(&thread_uris);
                let closed = Arc::clone(&thread_closed);
                let replies = replies.clone();
                thread::spawn(move || serve_ws(stream, &replies, &received, &uris, &closed));
            }
        });

        Self {
            addr,
            received,
            uris,
            closed,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("ws://{}/ws", self.addr)).unwrap()
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    pub fn received_named(&self, event: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|frame| frame["event"] == event)
            .collect()
    }

    pub fn uris(&self) -> Vec<String> {
        self.uris.lock().unwrap().clone()
    }

    pub fn closed_connections(&self) -> usize {
        *self.closed.lock().unwrap()
    }

    pub fn wait_for(&self, timeout: Duration, done: impl Fn(&Self) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done(self) {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        done(self)
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve_ws(
    stream: TcpStream,
    replies: &[Value],
    received: &Mutex<Vec<Value>>,
    uris: &Mutex<Vec<String>>,
    closed: &Mutex<usize>,
) {
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        uris.lock().unwrap().push(request.uri().to_string());
        Ok(response)
    };
    let Ok(mut socket) = tungstenite::accept_hdr(stream, callback) else {
        return;
    };
    loop {
        match socket.read() {
            Ok(Message::Text(text)) => {
                let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                let is_start = frame["event"] == "start";
                received.lock().unwrap().push(frame);
                if is_start {
                    for reply in replies {
                        if socket.send(Message::Text(reply.to_string())).is_err() {
                            break;
                        }
                    }
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    *closed.lock().unwrap() += 1;
}

/// Canned REST backend: answers `METHOD /api/v1/<path>` from a fixed table.
pub struct CannedBackend {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CannedBackend {
    pub fn start(routes: Vec<(&str, &str, u16, Value)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: HashMap<(String, String), (u16, String)> = routes
            .into_iter()
            .map(|(method, path, status, body)| {
                (
                    (method.to_string(), format!("/api/v1/{path}")),
                    (status, body.to_string()),
                )
            })
            .collect();
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);
        let handle = thread::spawn(move || {
            for stream in listener.incoming() {
                if thread_shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(stream) = stream else { continue };
                answer(stream, &routes);
            }
        });
        Self {
            addr,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/api/v1", self.addr)
    }
}

impl Drop for CannedBackend {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn answer(stream: TcpStream, routes: &HashMap<(String, String), (u16, String)>) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).unwrap_or(0) == 0 {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts
        .next()
        .unwrap_or_default()
        .split('?')
        .next()
        .unwrap_or_default()
        .to_string();

    let mut length = 0;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; length];
    let _ = reader.read_exact(&mut body);

    let (status, body) = routes
        .get(&(method, path))
        .cloned()
        .unwrap_or((404, r#"{"detail":"Not Found"}"#.to_string()));
    let mut stream = stream;
    let payload = format!(
        "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(payload.as_bytes());
    let _ = stream.flush();
}
