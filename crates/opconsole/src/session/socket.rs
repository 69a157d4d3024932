//! Duplex channel to the terminal gateway.
//!
//! One pump thread owns each WebSocket. It alternates between draining the
//! outbound queue and a short blocking read, and reports everything it sees
//! to the controller tagged with the connection's generation.

use std::io;
use std::net::Shutdown;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::thread;
use std::time::Duration;

use crossbeam_channel as channel;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use crossbeam_channel::TryRecvError;
use opconsole_api::SessionId;
use tracing::debug;
use tracing::warn;
use tungstenite::client::IntoClientRequest;
use tungstenite::Message;
use tungstenite::WebSocket;
use url::Url;

use crate::controller::ControllerEvent;
use crate::error::SessionError;
use crate::session::frames::InboundFrame;
use crate::session::frames::OutboundFrame;

pub const SESSION_ID_PARAM: &str = "sessionId";

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const DISCONNECT_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Opened,
    Frame(InboundFrame),
    Closed { reason: Option<String> },
}

/// Posts socket events for one connection generation into the controller queue.
#[derive(Debug, Clone)]
pub struct SocketSink {
    generation: u64,
    tx: Sender<ControllerEvent>,
}

impl SocketSink {
    pub fn new(generation: u64, tx: Sender<ControllerEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, event: SocketEvent) -> bool {
        self.tx
            .send(ControllerEvent::Socket {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Opens connections to the gateway. Opening is asynchronous: the handle is
/// returned at once and `SocketEvent::Opened` (or `Closed`) follows on the sink.
pub trait SocketConnector: Send {
    fn open(
        &self,
        session_id: &SessionId,
        sink: SocketSink,
    ) -> Result<Box<dyn SocketHandle>, SessionError>;
}

pub trait SocketHandle: Send {
    fn send(&mut self, frame: OutboundFrame) -> Result<(), SessionError>;

    /// Closes the connection. Idempotent. Late events from the closed
    /// generation may still arrive and are the receiver's to discard.
    fn disconnect(&mut self);
}

#[derive(Debug, Clone)]
pub struct WsConnector {
    base_url: Url,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(base_url: Url, connect_timeout: Duration) -> Self {
        Self {
            base_url,
            connect_timeout,
        }
    }

    pub fn session_url(&self, session_id: &SessionId) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair(SESSION_ID_PARAM, session_id.as_str());
        url
    }
}

impl SocketConnector for WsConnector {
    fn open(
        &self,
        session_id: &SessionId,
        sink: SocketSink,
    ) -> Result<Box<dyn SocketHandle>, SessionError> {
        let url = self.session_url(session_id);
        let connect_timeout = self.connect_timeout;
        let (commands_tx, commands_rx) = channel::unbounded();
        let (done_tx, done_rx) = channel::bounded::<()>(1);
        let span = tracing::debug_span!(
            "socket_pump",
            session_id = %session_id,
            generation = sink.generation()
        );
        thread::Builder::new()
            .name(format!("opconsole-socket-{}", sink.generation()))
            .spawn(move || {
                let _guard = span.enter();
                pump_loop(&url, connect_timeout, &commands_rx, &sink);
                drop(done_tx);
            })
            .map_err(|err| SessionError::Transport {
                reason: format!("failed to spawn socket thread: {err}"),
            })?;
        Ok(Box::new(WsSocketHandle {
            commands: commands_tx,
            done: done_rx,
            closed: false,
        }))
    }
}

enum PumpCommand {
    Frame(OutboundFrame),
    Close,
}

struct WsSocketHandle {
    commands: Sender<PumpCommand>,
    done: Receiver<()>,
    closed: bool,
}

impl SocketHandle for WsSocketHandle {
    fn send(&mut self, frame: OutboundFrame) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Transport {
                reason: "socket is closed".to_string(),
            });
        }
        self.commands
            .send(PumpCommand::Frame(frame))
            .map_err(|_| SessionError::Transport {
                reason: "socket connection has ended".to_string(),
            })
    }

    fn disconnect(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.commands.send(PumpCommand::Close);
        let _ = self.done.recv_timeout(DISCONNECT_WAIT);
    }
}

impl Drop for WsSocketHandle {
    fn drop(&mut self) {
        self.disconnect();
    }
}

enum PumpExit {
    Requested,
    Lost(Option<String>),
}

fn pump_loop(
    url: &Url,
    connect_timeout: Duration,
    commands: &Receiver<PumpCommand>,
    sink: &SocketSink,
) {
    let mut socket = match connect_ws_socket(url, connect_timeout) {
        Ok(socket) => socket,
        Err(err) => {
            debug!(error = %err, "Socket connect failed");
            sink.emit(SocketEvent::Closed {
                reason: Some(err.to_string()),
            });
            return;
        }
    };
    debug!("Socket open");
    sink.emit(SocketEvent::Opened);

    match pump_messages(&mut socket, commands, sink) {
        PumpExit::Requested => {
            debug!("Socket closed by controller");
            let _ = socket.close(None);
            let _ = socket.flush();
            let _ = socket.get_mut().shutdown(Shutdown::Both);
        }
        PumpExit::Lost(reason) => {
            debug!(reason = ?reason, "Socket lost");
            let _ = socket.get_mut().shutdown(Shutdown::Both);
            sink.emit(SocketEvent::Closed { reason });
        }
    }
}

fn pump_messages(
    socket: &mut WebSocket<TcpStream>,
    commands: &Receiver<PumpCommand>,
    sink: &SocketSink,
) -> PumpExit {
    loop {
        loop {
            match commands.try_recv() {
                Ok(PumpCommand::Frame(frame)) => {
                    let text = match frame.to_json() {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(
                                error = %err,
                                event = frame.event_name(),
                                "Dropping unencodable frame"
                            );
                            continue;
                        }
                    };
                    if let Err(err) = socket.send(Message::Text(text)) {
                        return PumpExit::Lost(Some(format!("send failed: {err}")));
                    }
                }
                Ok(PumpCommand::Close) | Err(TryRecvError::Disconnected) => {
                    return PumpExit::Requested;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        match socket.read() {
            Ok(Message::Text(text)) => match InboundFrame::from_json(&text) {
                Ok(frame) => {
                    if !sink.emit(SocketEvent::Frame(frame)) {
                        return PumpExit::Requested;
                    }
                }
                Err(err) => warn!(error = %err, "Ignoring unrecognised gateway frame"),
            },
            Ok(Message::Binary(bytes)) => {
                if !sink.emit(SocketEvent::Frame(InboundFrame::Data { bytes })) {
                    return PumpExit::Requested;
                }
            }
            Ok(Message::Ping(_)) => {
                // tungstenite queues the pong; flushing sends it.
                if let Err(err) = socket.flush() {
                    if !is_timeout_error(&err) {
                        return PumpExit::Lost(Some(format!("pong failed: {err}")));
                    }
                }
            }
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|frame| frame.reason.to_string())
                    .filter(|reason| !reason.is_empty());
                return PumpExit::Lost(reason);
            }
            Ok(_) => {}
            Err(err) if is_timeout_error(&err) => {}
            Err(tungstenite::Error::ConnectionClosed) => return PumpExit::Lost(None),
            Err(err) => return PumpExit::Lost(Some(err.to_string())),
        }
    }
}

fn is_timeout_error(err: &tungstenite::Error) -> bool {
    matches!(
        err,
        tungstenite::Error::Io(io_err)
            if matches!(io_err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
    )
}

fn ws_error_to_session(err: tungstenite::Error) -> SessionError {
    SessionError::Transport {
        reason: format!("websocket error: {err}"),
    }
}

fn transport_error(message: impl Into<String>) -> SessionError {
    SessionError::Transport {
        reason: message.into(),
    }
}

fn io_transport(err: io::Error) -> SessionError {
    transport_error(format!("socket setup failed: {err}"))
}

fn connect_ws_socket(
    url: &Url,
    connect_timeout: Duration,
) -> Result<WebSocket<TcpStream>, SessionError> {
    if url.scheme() != "ws" {
        return Err(transport_error(format!(
            "unsupported websocket scheme '{}'; only ws:// is supported",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| transport_error("websocket URL is missing a host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| transport_error("websocket URL is missing a port"))?;
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|err| transport_error(format!("failed to resolve '{host}:{port}': {err}")))?
        .next()
        .ok_or_else(|| transport_error(format!("failed to resolve '{host}:{port}'")))?;

    let stream = TcpStream::connect_timeout(&addr, connect_timeout)
        .map_err(|err| transport_error(format!("connect to {addr} failed: {err}")))?;
    stream.set_nodelay(true).map_err(io_transport)?;
    stream
        .set_read_timeout(Some(connect_timeout))
        .map_err(io_transport)?;
    stream
        .set_write_timeout(Some(WRITE_TIMEOUT))
        .map_err(io_transport)?;

    let request = url
        .as_str()
        .into_client_request()
        .map_err(|err| transport_error(format!("invalid websocket URL: {err}")))?;

    let (socket, _response) =
        tungstenite::client::client(request, stream).map_err(|err| match err {
            tungstenite::HandshakeError::Failure(ws_err) => ws_error_to_session(ws_err),
            tungstenite::HandshakeError::Interrupted(_) => {
                transport_error("websocket handshake timed out")
            }
        })?;
    socket
        .get_ref()
        .set_read_timeout(Some(POLL_INTERVAL))
        .map_err(io_transport)?;
    Ok(socket)
}
