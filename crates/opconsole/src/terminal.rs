//! The operator's terminal as a session surface.
//!
//! The surface is the local tty in raw mode. A reader thread turns crossterm
//! events into [`SurfaceEvent`]s on the controller queue; everything the
//! session wants to show is written back through [`TerminalSurface::write`].

use std::io;
use std::io::Write;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use crossterm::event;
use crossterm::event::DisableBracketedPaste;
use crossterm::event::EnableBracketedPaste;
use crossterm::event::Event;
use crossterm::event::KeyEventKind;
use crossterm::execute;
use crossterm::terminal;
use crossterm::terminal::disable_raw_mode;
use crossterm::terminal::enable_raw_mode;
use opconsole_api::Device;
use tracing::debug;
use tracing::warn;

use crate::controller::ControllerEvent;
use crate::error::SessionError;
use crate::keys::key_event_to_bytes;

const READER_POLL: Duration = Duration::from_millis(50);
const FALLBACK_SIZE: (u16, u16) = (80, 24);

const BOLD_GREEN: &str = "\x1b[1;32m";
const BOLD_RED: &str = "\x1b[1;31m";
const BOLD_CYAN: &str = "\x1b[1;36m";
const RESET: &str = "\x1b[0m";

/// Erases the character left of the cursor.
pub const ERASE_SEQUENCE: &[u8] = b"\x08 \x08";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// Keystrokes or pasted text, already encoded as terminal bytes.
    Input(Vec<u8>),
    Resize { cols: u16, rows: u16 },
    /// The input source failed or reached end of file.
    Failed { reason: String },
}

/// Rendering surface bound to one session.
pub trait TerminalSurface: Send {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Current grid size as `(cols, rows)`.
    fn size(&self) -> (u16, u16);

    fn focus(&mut self);

    /// Releases the surface. Idempotent; writes after dispose are dropped.
    fn dispose(&mut self);
}

/// Opens a surface whose input and resize events are posted to `events`.
pub trait SurfaceProvider: Send {
    fn open(
        &mut self,
        events: Sender<ControllerEvent>,
    ) -> Result<Box<dyn TerminalSurface>, SessionError>;
}

/// Restores terminal state on drop to avoid leaving the user's shell in a broken mode.
#[must_use = "TerminalGuard must be held for the duration of the session"]
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Result<Self, SessionError> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        if let Err(err) = execute!(stdout, EnableBracketedPaste) {
            let _ = disable_raw_mode();
            return Err(SessionError::Terminal(err));
        }
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = execute!(stdout, DisableBracketedPaste);
        let _ = disable_raw_mode();
        let _ = stdout.write_all(b"\x1b[0m\x1b[?25h");
        let _ = stdout.flush();
    }
}

#[derive(Debug, Default)]
pub struct CrosstermSurfaceProvider;

impl CrosstermSurfaceProvider {
    pub fn new() -> Self {
        Self
    }
}

impl SurfaceProvider for CrosstermSurfaceProvider {
    fn open(
        &mut self,
        events: Sender<ControllerEvent>,
    ) -> Result<Box<dyn TerminalSurface>, SessionError> {
        let surface = CrosstermSurface::open(events)?;
        Ok(Box::new(surface))
    }
}

/// Raw-mode stdout plus a crossterm reader thread.
///
/// The alternate screen is not used, so the session transcript stays in the
/// operator's scrollback after close.
pub struct CrosstermSurface {
    guard: Option<TerminalGuard>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    stdout: io::Stdout,
}

impl CrosstermSurface {
    pub fn open(events: Sender<ControllerEvent>) -> Result<Self, SessionError> {
        let guard = TerminalGuard::new()?;
        let stop = Arc::new(AtomicBool::new(false));
        let reader_stop = Arc::clone(&stop);
        let reader = thread::Builder::new()
            .name("opconsole-input".to_string())
            .spawn(move || read_events(&reader_stop, &events))?;
        Ok(Self {
            guard: Some(guard),
            stop,
            reader: Some(reader),
            stdout: io::stdout(),
        })
    }
}

impl TerminalSurface for CrosstermSurface {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.guard.is_none() {
            return Ok(());
        }
        self.stdout.write_all(bytes)?;
        self.stdout.flush()
    }

    fn size(&self) -> (u16, u16) {
        terminal::size().unwrap_or(FALLBACK_SIZE)
    }

    fn focus(&mut self) {
        if self.guard.is_some() {
            let _ = self.stdout.write_all(b"\x1b[?25h");
            let _ = self.stdout.flush();
        }
    }

    fn dispose(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("Terminal input thread panicked");
            }
        }
        if self.guard.take().is_some() {
            debug!("Terminal restored");
        }
    }
}

impl Drop for CrosstermSurface {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn read_events(stop: &AtomicBool, events: &Sender<ControllerEvent>) {
    while !stop.load(Ordering::SeqCst) {
        let ready = match event::poll(READER_POLL) {
            Ok(ready) => ready,
            Err(err) => {
                let _ = events.send(ControllerEvent::Surface(SurfaceEvent::Failed {
                    reason: err.to_string(),
                }));
                return;
            }
        };
        if !ready {
            continue;
        }
        let surface_event = match event::read() {
            Ok(Event::Key(key)) if key.kind != KeyEventKind::Release => {
                key_event_to_bytes(&key).map(SurfaceEvent::Input)
            }
            Ok(Event::Paste(text)) => Some(SurfaceEvent::Input(text.into_bytes())),
            Ok(Event::Resize(cols, rows)) => Some(SurfaceEvent::Resize { cols, rows }),
            Ok(_) => None,
            Err(err) => Some(SurfaceEvent::Failed {
                reason: err.to_string(),
            }),
        };
        let Some(surface_event) = surface_event else {
            continue;
        };
        let failed = matches!(surface_event, SurfaceEvent::Failed { .. });
        if events.send(ControllerEvent::Surface(surface_event)).is_err() || failed {
            return;
        }
    }
}

/// Converts bare `\n` to `\r\n`; raw mode does not translate line feeds.
pub fn normalize_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 16);
    let mut previous = None;
    for ch in text.chars() {
        if ch == '\n' && previous != Some('\r') {
            out.push('\r');
        }
        out.push(ch);
        previous = Some(ch);
    }
    out
}

/// Captured one-shot command output, bold green.
pub fn success_block(output: &str) -> String {
    format!("{BOLD_GREEN}{}{RESET}\r\n", normalize_newlines(output))
}

/// A failure rendered inline, bold red.
pub fn error_line(message: &str) -> String {
    format!("{BOLD_RED}{}{RESET}\r\n", normalize_newlines(message))
}

/// Connection lifecycle notice, bold cyan on its own line.
pub fn status_line(text: &str) -> String {
    format!("\r\n{BOLD_CYAN}{text}{RESET}\r\n")
}

pub fn device_banner(device: &Device) -> String {
    format!(
        "{BOLD_CYAN}Device information:{RESET}\r\n\
         Hostname: {}\r\n\
         IP: {}\r\n\
         SSH Port: {}\r\n\
         OS: {}\r\n\
         Group: {}\r\n\
         Created: {}\r\n\r\n",
        device.hostname,
        device.ip_address,
        device.port(),
        if device.os_type.is_empty() {
            "-"
        } else {
            device.os_type.as_str()
        },
        device.group_label(),
        device.created_at_display(),
    )
}
