//! Turns termination signals into close requests for a running session.

use crossbeam_channel::Sender;
use tracing::info;

use crate::controller::CloseReason;
use crate::controller::ControllerEvent;
use crate::error::SessionError;

/// Forwards the first SIGINT, SIGTERM or SIGHUP to the controller as a
/// close request.
///
/// In raw mode Ctrl-C arrives as a keystroke, so SIGINT here only comes from
/// another process.
pub struct CloseSignals {
    #[cfg(unix)]
    handle: signal_hook::iterator::Handle,
}

impl CloseSignals {
    #[cfg(unix)]
    pub fn install(events: Sender<ControllerEvent>) -> Result<Self, SessionError> {
        use signal_hook::consts::SIGHUP;
        use signal_hook::consts::SIGINT;
        use signal_hook::consts::SIGTERM;
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
        let handle = signals.handle();
        std::thread::Builder::new()
            .name("opconsole-signals".to_string())
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    info!(signal, "Received signal, closing session");
                    let _ = events.send(ControllerEvent::CloseRequested(CloseReason::Signal));
                }
            })?;
        Ok(Self { handle })
    }

    #[cfg(not(unix))]
    pub fn install(_events: Sender<ControllerEvent>) -> Result<Self, SessionError> {
        info!("Signal forwarding is not available on this platform");
        Ok(Self {})
    }
}

impl Drop for CloseSignals {
    fn drop(&mut self) {
        #[cfg(unix)]
        self.handle.close();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_sighup_posts_close_request() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let _signals = CloseSignals::install(tx).unwrap();
        signal_hook::low_level::raise(signal_hook::consts::SIGHUP).unwrap();
        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            ControllerEvent::CloseRequested(reason) => assert_eq!(reason, CloseReason::Signal),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
