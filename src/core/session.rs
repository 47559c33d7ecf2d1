//! Session management
//!
//! The single authority over the terminal session lifecycle. A session
//! owns exactly one emulator/transport pair at a time, created together
//! on activation and released together on teardown; no state survives
//! into the next activation.
//!
//! Asynchronous callbacks (socket events) can interleave arbitrarily
//! with teardown, so every delivery is tagged with the activation epoch
//! it belongs to and checked against the live epoch before it may touch
//! anything.

use std::sync::mpsc::{Receiver, TryRecvError};

use tracing::{debug, info, warn};
use url::Url;

use super::input::{KeyAction, LineBuffer};
use super::term::Emulator;
use super::transport::{
    endpoint_url, ControlAction, EventEnvelope, Transport, TransportError, TransportEvent,
    WsTransport,
};

/// Lifecycle states. `Idle` never transitions directly to `Connected`;
/// activation always passes through `Initializing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Initializing,
    Connected,
    Disconnected(String),
    Stopped,
}

/// Why a deactivation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The user pressed stop.
    UserStop,
    /// The hosting program is exiting.
    HostExit,
}

/// How the session obtains a transport. Injected so tests can run the
/// full lifecycle against a scripted transport with no sockets.
pub type Dialer =
    Box<dyn FnMut(&Url, u64) -> Result<(Box<dyn Transport>, Receiver<EventEnvelope>), TransportError>>;

fn ws_dialer() -> Dialer {
    Box::new(|url, epoch| {
        let (transport, events) = WsTransport::open(url, epoch)?;
        Ok((Box::new(transport) as Box<dyn Transport>, events))
    })
}

/// One activate-to-teardown lifecycle of the terminal feature.
pub struct Session {
    state: SessionState,
    /// Bumped on every activation; events from older epochs are stale.
    epoch: u64,
    endpoint: String,
    /// Viewport dimensions, announced by the host once the display
    /// surface exists. Activation refuses to run without it.
    surface: Option<(u16, u16)>,
    emulator: Option<Emulator>,
    transport: Option<Box<dyn Transport>>,
    events: Option<Receiver<EventEnvelope>>,
    line: LineBuffer,
    /// Set when a terminal transport event was handled; the pair is
    /// released on the next pump so the host can render the parting
    /// diagnostic first.
    teardown_pending: bool,
    dial: Dialer,
}

impl Session {
    pub fn new(endpoint: &str) -> Self {
        Self::with_dialer(endpoint, ws_dialer())
    }

    pub fn with_dialer(endpoint: &str, dial: Dialer) -> Self {
        Self {
            state: SessionState::Idle,
            epoch: 0,
            endpoint: endpoint.to_string(),
            surface: None,
            emulator: None,
            transport: None,
            events: None,
            line: LineBuffer::new(),
            teardown_pending: false,
            dial,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            SessionState::Initializing | SessionState::Connected
        )
    }

    /// The host announces that the display surface exists and how big
    /// it is. Until this is called, activation aborts without side
    /// effects.
    pub fn surface_ready(&mut self, cols: u16, rows: u16) {
        self.surface = Some((cols, rows));
    }

    pub fn emulator(&self) -> Option<&Emulator> {
        self.emulator.as_ref()
    }

    pub fn emulator_mut(&mut self) -> Option<&mut Emulator> {
        self.emulator.as_mut()
    }

    /// Start a session with the given auth token.
    ///
    /// Preconditions: not already active, token present, surface
    /// announced. Any failure aborts back to `Idle` with nothing
    /// half-built; the connection itself completes asynchronously and
    /// is reported through [`Session::pump`].
    pub fn activate(&mut self, token: &str) {
        if self.is_active() {
            debug!("activation ignored, session already active");
            return;
        }
        // A terminal event may still be waiting for its parting render;
        // re-activation must not stack a second pair on top of it.
        if self.teardown_pending {
            self.teardown_pending = false;
            self.release_pair();
        }
        if token.is_empty() {
            warn!("no auth token, staying idle");
            self.state = SessionState::Idle;
            return;
        }
        let Some((cols, rows)) = self.surface else {
            warn!("display surface not ready, staying idle");
            self.state = SessionState::Idle;
            return;
        };

        let url = match endpoint_url(&self.endpoint, token) {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, "bad endpoint, staying idle");
                self.state = SessionState::Idle;
                return;
            }
        };

        self.epoch += 1;
        match (self.dial)(&url, self.epoch) {
            Ok((transport, events)) => {
                self.emulator = Some(Emulator::new(cols, rows));
                self.transport = Some(transport);
                self.events = Some(events);
                self.teardown_pending = false;
                self.state = SessionState::Initializing;
                info!(epoch = self.epoch, "session initializing");
            }
            Err(err) => {
                warn!(error = %err, "failed to start transport, staying idle");
                self.state = SessionState::Idle;
            }
        }
    }

    /// Stop the session. Safe to call at any time; a no-op when nothing
    /// is live. Sends the terminate control frame (this is the "I am
    /// done", distinct from the network dying), closes the transport,
    /// disposes the emulator, and clears the pending command line.
    pub fn deactivate(&mut self, reason: StopReason) {
        if self.transport.is_none() && self.emulator.is_none() {
            debug!(?reason, "deactivation ignored, nothing live");
            return;
        }
        info!(?reason, "stopping session");
        if let Some(mut transport) = self.transport.take() {
            if transport.is_open() {
                transport.send_control(ControlAction::TerminateSession);
            }
            transport.close();
        }
        self.release_rest();
        self.state = SessionState::Stopped;
    }

    /// Route one keystroke through the line discipline. Ignored when no
    /// pair is live (stale keystrokes must not crash anything).
    pub fn on_keystroke(&mut self, ch: char) {
        let (Some(emulator), Some(transport)) = (self.emulator.as_mut(), self.transport.as_mut())
        else {
            debug!("keystroke with no live session, ignoring");
            return;
        };
        match self.line.push(ch) {
            KeyAction::Dispatch(command) => {
                transport.send(&command);
                emulator.feed("\r\n");
            }
            KeyAction::Erase => emulator.erase_column(),
            KeyAction::Echo(ch) => {
                let mut buf = [0u8; 4];
                emulator.feed(ch.encode_utf8(&mut buf));
            }
            KeyAction::Ignore => {}
        }
    }

    /// Drain queued transport events. Returns true when the emulator
    /// content changed and the host should re-render.
    ///
    /// A terminal event (error or close) writes its diagnostic to the
    /// still-attached emulator and schedules the release of the pair
    /// for the next call, so one render of the parting message happens
    /// in between.
    pub fn pump(&mut self) -> bool {
        if self.teardown_pending {
            self.teardown_pending = false;
            self.release_pair();
        }

        let Some(events) = &self.events else {
            return false;
        };
        let mut batch = Vec::new();
        loop {
            match events.try_recv() {
                Ok(envelope) => batch.push(envelope),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        let mut dirty = false;
        for (epoch, event) in batch {
            if epoch != self.epoch {
                debug!(epoch, current = self.epoch, "dropping stale transport event");
                continue;
            }
            match event {
                TransportEvent::Open => {
                    if self.state == SessionState::Initializing {
                        self.state = SessionState::Connected;
                        info!(endpoint = %self.endpoint, "session connected");
                        let greeting = format!("Connected to {}\r\n\r\n", self.endpoint);
                        if let Some(emulator) = self.emulator.as_mut() {
                            emulator.feed(&greeting);
                            dirty = true;
                        }
                    }
                }
                TransportEvent::Message(text) => {
                    if let Some(emulator) = self.emulator.as_mut() {
                        emulator.feed(&text);
                        dirty = true;
                    }
                }
                TransportEvent::Error(info) => {
                    warn!(info = %info, "transport error");
                    if let Some(emulator) = self.emulator.as_mut() {
                        emulator.feed(&format!("\r\n\x1b[31mConnection error: {}\x1b[0m\r\n", info));
                        dirty = true;
                    }
                }
                TransportEvent::Closed { code, reason } => {
                    info!(code, reason = %reason, "transport closed");
                    if let Some(emulator) = self.emulator.as_mut() {
                        emulator.feed(&format!("\r\n\x1b[33mDisconnected (code {})\x1b[0m\r\n", code));
                        dirty = true;
                    }
                    self.state = SessionState::Disconnected(if reason.is_empty() {
                        format!("code {}", code)
                    } else {
                        reason
                    });
                    self.teardown_pending = true;
                    break;
                }
            }
        }
        dirty
    }

    /// Re-fit the emulator to a new viewport. Skipped (not an error)
    /// when the pair has already been released; the new size is kept
    /// for the next activation.
    pub fn handle_resize(&mut self, cols: u16, rows: u16) -> bool {
        self.surface = Some((cols, rows));
        match self.emulator.as_mut() {
            Some(emulator) => {
                emulator.resize(cols, rows);
                true
            }
            None => {
                debug!("resize with no live emulator, skipping fit");
                false
            }
        }
    }

    // Teardown for remote-initiated endings: no terminate frame, the
    // other side already knows the connection is over.
    fn release_pair(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.release_rest();
    }

    fn release_rest(&mut self) {
        self.emulator = None;
        self.events = None;
        if !self.line.is_empty() {
            debug!("discarding partially typed command");
        }
        self.line.clear();
        self.teardown_pending = false;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.deactivate(StopReason::HostExit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::{self, Sender};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Log {
        sent: Vec<String>,
        controls: usize,
        closes: usize,
        dials: usize,
        live_transports: i32,
    }

    struct Scripted {
        log: Arc<Mutex<Log>>,
        open: bool,
    }

    impl Transport for Scripted {
        fn send(&mut self, text: &str) {
            if self.open {
                self.log.lock().unwrap().sent.push(text.to_string());
            }
        }

        fn send_control(&mut self, _action: ControlAction) {
            if self.open {
                self.log.lock().unwrap().controls += 1;
            }
        }

        fn close(&mut self) {
            if self.open {
                self.open = false;
                let mut log = self.log.lock().unwrap();
                log.closes += 1;
                log.live_transports -= 1;
            }
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    type Senders = Arc<Mutex<Vec<Sender<EventEnvelope>>>>;

    fn scripted_session() -> (Session, Arc<Mutex<Log>>, Senders) {
        let log = Arc::new(Mutex::new(Log::default()));
        let senders: Senders = Arc::new(Mutex::new(Vec::new()));
        let dial_log = log.clone();
        let dial_senders = senders.clone();
        let dial: Dialer = Box::new(move |_url, _epoch| {
            let (tx, rx) = mpsc::channel();
            dial_senders.lock().unwrap().push(tx);
            let mut log = dial_log.lock().unwrap();
            log.dials += 1;
            log.live_transports += 1;
            Ok((
                Box::new(Scripted {
                    log: dial_log.clone(),
                    open: true,
                }) as Box<dyn Transport>,
                rx,
            ))
        });
        let mut session = Session::with_dialer("ws://localhost:5000/terminal", dial);
        session.surface_ready(80, 24);
        (session, log, senders)
    }

    fn screen_text(session: &Session) -> String {
        let Some(emulator) = session.emulator() else {
            return String::new();
        };
        let screen = emulator.screen();
        (0..screen.rows as usize)
            .filter_map(|row| screen.grid().line(row))
            .map(|line| {
                line.iter()
                    .filter(|c| !c.is_spacer())
                    .map(|c| c.display())
                    .collect::<String>()
                    .trim_end()
                    .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn activate_with_empty_token_stays_idle() {
        let (mut session, log, _) = scripted_session();
        session.activate("");
        assert_eq!(*session.state(), SessionState::Idle);
        assert_eq!(log.lock().unwrap().dials, 0);
        assert!(session.emulator().is_none());
    }

    #[test]
    fn activate_without_surface_stays_idle() {
        let (_, log, _) = scripted_session();
        let dial: Dialer = Box::new(|_, _| panic!("dial must not run without a surface"));
        let mut session = Session::with_dialer("ws://localhost:5000/terminal", dial);
        session.activate("tok-1");
        assert_eq!(*session.state(), SessionState::Idle);
        assert_eq!(log.lock().unwrap().dials, 0);
    }

    #[test]
    fn activation_passes_through_initializing() {
        let (mut session, _, senders) = scripted_session();
        session.activate("tok-1");
        assert_eq!(*session.state(), SessionState::Initializing);

        senders.lock().unwrap()[0].send((1, TransportEvent::Open)).unwrap();
        session.pump();
        assert_eq!(*session.state(), SessionState::Connected);
    }

    #[test]
    fn duplicate_activation_is_ignored() {
        let (mut session, log, _) = scripted_session();
        session.activate("tok-1");
        session.activate("tok-1");
        assert_eq!(log.lock().unwrap().dials, 1);
    }

    #[test]
    fn full_session_scenario() {
        let (mut session, log, senders) = scripted_session();
        session.activate("tok-1");
        senders.lock().unwrap()[0].send((1, TransportEvent::Open)).unwrap();
        session.pump();
        assert_eq!(*session.state(), SessionState::Connected);

        for ch in "echo hi".chars() {
            session.on_keystroke(ch);
        }
        session.on_keystroke('\r');
        assert_eq!(log.lock().unwrap().sent, vec!["echo hi\n".to_string()]);

        senders.lock().unwrap()[0]
            .send((1, TransportEvent::Message("hi\r\n".to_string())))
            .unwrap();
        assert!(session.pump());
        assert!(screen_text(&session).contains("hi"));

        session.deactivate(StopReason::UserStop);
        let log = log.lock().unwrap();
        assert_eq!(log.controls, 1);
        assert_eq!(log.closes, 1);
        assert_eq!(*session.state(), SessionState::Stopped);
        assert!(session.emulator().is_none());
    }

    #[test]
    fn deactivate_is_idempotent() {
        let (mut session, log, _) = scripted_session();
        session.activate("tok-1");
        session.deactivate(StopReason::UserStop);
        session.deactivate(StopReason::UserStop);
        let log = log.lock().unwrap();
        assert_eq!(log.controls, 1);
        assert_eq!(log.closes, 1);
    }

    #[test]
    fn deactivate_before_activate_is_a_no_op() {
        let (mut session, log, _) = scripted_session();
        session.deactivate(StopReason::UserStop);
        assert_eq!(*session.state(), SessionState::Idle);
        assert_eq!(log.lock().unwrap().closes, 0);
    }

    #[test]
    fn emulator_and_transport_stay_paired() {
        let (mut session, log, _) = scripted_session();

        let check = |session: &Session, log: &Arc<Mutex<Log>>| {
            let live = log.lock().unwrap().live_transports;
            assert_eq!(session.emulator().is_some() as i32, live);
            assert!((0..=1).contains(&live));
        };

        check(&session, &log);
        session.activate("tok-1");
        check(&session, &log);
        session.deactivate(StopReason::UserStop);
        check(&session, &log);
        session.activate("tok-2");
        check(&session, &log);
        session.deactivate(StopReason::HostExit);
        check(&session, &log);
    }

    #[test]
    fn stale_epoch_events_are_dropped() {
        let (mut session, _, senders) = scripted_session();
        session.activate("tok-1");
        session.deactivate(StopReason::UserStop);
        session.activate("tok-1");
        senders.lock().unwrap()[1].send((2, TransportEvent::Open)).unwrap();
        session.pump();

        // A callback queued by the first (torn down) transport arrives
        // late on the live channel: its epoch no longer matches.
        senders.lock().unwrap()[1]
            .send((1, TransportEvent::Message("ghost".to_string())))
            .unwrap();
        session.pump();
        assert!(!screen_text(&session).contains("ghost"));

        // The first channel itself is gone entirely.
        assert!(senders.lock().unwrap()[0]
            .send((1, TransportEvent::Message("ghost".to_string())))
            .is_err());
    }

    #[test]
    fn remote_close_shows_diagnostic_then_releases_pair() {
        let (mut session, log, senders) = scripted_session();
        session.activate("tok-1");
        senders.lock().unwrap()[0].send((1, TransportEvent::Open)).unwrap();
        session.pump();

        senders.lock().unwrap()[0]
            .send((1, TransportEvent::Error("broken pipe".to_string())))
            .unwrap();
        senders.lock().unwrap()[0]
            .send((
                1,
                TransportEvent::Closed {
                    code: 1006,
                    reason: String::new(),
                },
            ))
            .unwrap();

        assert!(session.pump());
        // Diagnostic written while the emulator is still attached
        assert!(screen_text(&session).contains("Connection error: broken pipe"));
        assert!(screen_text(&session).contains("Disconnected (code 1006)"));
        assert_eq!(
            *session.state(),
            SessionState::Disconnected("code 1006".to_string())
        );

        // The pair is released on the following pump, without sending
        // a terminate frame.
        session.pump();
        assert!(session.emulator().is_none());
        let log = log.lock().unwrap();
        assert_eq!(log.controls, 0);
        assert_eq!(log.closes, 1);
        assert_eq!(log.live_transports, 0);
    }

    #[test]
    fn resize_after_teardown_skips_fit() {
        let (mut session, _, _) = scripted_session();
        session.activate("tok-1");
        assert!(session.handle_resize(100, 30));
        session.deactivate(StopReason::UserStop);
        assert!(!session.handle_resize(50, 20));
    }

    #[test]
    fn keystrokes_without_live_session_are_ignored() {
        let (mut session, log, _) = scripted_session();
        session.on_keystroke('x');
        session.on_keystroke('\r');
        assert!(log.lock().unwrap().sent.is_empty());
    }

    #[test]
    fn buffer_is_cleared_on_teardown() {
        let (mut session, log, senders) = scripted_session();
        session.activate("tok-1");
        senders.lock().unwrap()[0].send((1, TransportEvent::Open)).unwrap();
        session.pump();

        session.on_keystroke('l');
        session.on_keystroke('s');
        session.deactivate(StopReason::UserStop);

        session.activate("tok-1");
        senders.lock().unwrap()[1].send((2, TransportEvent::Open)).unwrap();
        session.pump();
        session.on_keystroke('\r');
        // Only the bare newline: nothing leaked from the first session
        assert_eq!(log.lock().unwrap().sent.last().unwrap(), "\n");
    }
}
