//! WebSocket transport
//!
//! Owns the bidirectional socket to the remote shell endpoint. Each
//! adapter instance makes exactly one connection attempt on a dedicated
//! I/O thread; frames and terminal conditions come back to the session
//! as epoch-tagged events over a channel.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Error as WsError, Message};
use url::Url;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported URL scheme: {0} (expected ws or wss)")]
    UnsupportedScheme(String),

    #[error("failed to spawn I/O thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Events delivered to the session controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The socket handshake completed.
    Open,
    /// An inbound text frame (binary frames are decoded lossily).
    Message(String),
    /// The connection failed; a `Closed` event follows.
    Error(String),
    /// The connection ended. Terminal for the adapter.
    Closed { code: u16, reason: String },
}

/// Events are tagged with the activation epoch they belong to, so the
/// session can reject deliveries from a torn-down instance.
pub type EventEnvelope = (u64, TransportEvent);

/// Out-of-band session control, sent as a JSON text frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    /// Explicit user-initiated stop, as opposed to the network dying.
    TerminateSession,
}

impl ControlAction {
    pub fn to_frame(self) -> String {
        match self {
            ControlAction::TerminateSession => {
                json!({ "action": "terminate_session" }).to_string()
            }
        }
    }
}

/// The seam between the session controller and the socket. The concrete
/// implementation is [`WsTransport`]; tests substitute a scripted one.
pub trait Transport {
    /// Queue a text frame. Drops silently (logged) when the socket is
    /// not open: stale keystrokes after a disconnect must not crash.
    fn send(&mut self, text: &str);
    /// Send a control frame.
    fn send_control(&mut self, action: ControlAction);
    /// Tear the connection down. Idempotent; once it returns, no
    /// further events are delivered.
    fn close(&mut self);
    fn is_open(&self) -> bool;
}

/// Build the connection URL with the token as a query parameter.
pub fn endpoint_url(endpoint: &str, token: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(endpoint)?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(TransportError::UnsupportedScheme(other.to_string())),
    }
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

enum Command {
    Send(Message),
    Shutdown,
}

/// Transport over a tungstenite WebSocket.
pub struct WsTransport {
    cmd_tx: Sender<Command>,
    open: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    /// Whether the blocking connect has resolved (either way).
    handshake_done: Arc<AtomicBool>,
    closed: bool,
    io_thread: Option<JoinHandle<()>>,
}

impl WsTransport {
    /// Connect to `url`, delivering events tagged with `epoch`.
    ///
    /// The connect itself happens on the I/O thread; failures surface
    /// as `Error`/`Closed` events, never synchronously.
    pub fn open(url: &Url, epoch: u64) -> Result<(Self, Receiver<EventEnvelope>), TransportError> {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let open = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));
        let handshake_done = Arc::new(AtomicBool::new(false));

        let io_url = url.clone();
        let io_open = open.clone();
        let io_shutdown = shutdown.clone();
        let io_handshake = handshake_done.clone();
        let io_thread = thread::Builder::new()
            .name("wsterm-io".to_string())
            .spawn(move || io_loop(io_url, epoch, cmd_rx, event_tx, io_open, io_shutdown, io_handshake))
            .map_err(TransportError::Spawn)?;

        Ok((
            Self {
                cmd_tx,
                open,
                shutdown,
                handshake_done,
                closed: false,
                io_thread: Some(io_thread),
            },
            event_rx,
        ))
    }
}

impl Transport for WsTransport {
    fn send(&mut self, text: &str) {
        if !self.is_open() {
            tracing::debug!(len = text.len(), "socket not open, dropping outbound text");
            return;
        }
        if self
            .cmd_tx
            .send(Command::Send(Message::Text(text.to_string())))
            .is_err()
        {
            tracing::debug!("I/O thread gone, dropping outbound text");
        }
    }

    fn send_control(&mut self, action: ControlAction) {
        if !self.is_open() {
            tracing::debug!(?action, "socket not open, dropping control frame");
            return;
        }
        if self
            .cmd_tx
            .send(Command::Send(Message::Text(action.to_frame())))
            .is_err()
        {
            tracing::debug!(?action, "I/O thread gone, dropping control frame");
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.open.store(false, Ordering::SeqCst);
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Some(handle) = self.io_thread.take() {
            if self.handshake_done.load(Ordering::SeqCst) {
                let _ = handle.join();
            }
            // Otherwise the thread is still inside the blocking
            // connect; it observes the shutdown flag when the connect
            // resolves and discards the socket on its own.
        }
    }

    fn is_open(&self) -> bool {
        !self.closed && self.open.load(Ordering::SeqCst)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn io_loop(
    url: Url,
    epoch: u64,
    cmd_rx: Receiver<Command>,
    event_tx: Sender<EventEnvelope>,
    open: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    handshake_done: Arc<AtomicBool>,
) {
    let emit = |event: TransportEvent| {
        let _ = event_tx.send((epoch, event));
    };

    let connected = tungstenite::connect(url.as_str());
    handshake_done.store(true, Ordering::SeqCst);
    let mut socket = match connected {
        Ok((socket, _response)) => socket,
        Err(err) => {
            tracing::debug!(error = %err, "websocket connect failed");
            if !shutdown.load(Ordering::SeqCst) {
                emit(TransportEvent::Error(err.to_string()));
                emit(TransportEvent::Closed {
                    code: 1006,
                    reason: "connect failed".to_string(),
                });
            }
            return;
        }
    };

    // Teardown raced ahead of the handshake; discard the connection
    // without reporting anything.
    if shutdown.load(Ordering::SeqCst) {
        let _ = socket.close(None);
        return;
    }

    if let MaybeTlsStream::Plain(stream) = socket.get_mut() {
        let _ = stream.set_nonblocking(true);
    }

    open.store(true, Ordering::SeqCst);
    emit(TransportEvent::Open);

    loop {
        if shutdown.load(Ordering::SeqCst) {
            // Local close: run the close handshake best-effort and exit
            // without emitting; the session initiated this and already
            // knows.
            let _ = socket.close(None);
            for _ in 0..20 {
                match socket.read() {
                    Err(WsError::Io(err)) if err.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                    Ok(_) => {}
                }
            }
            return;
        }

        // Outbound first so keystrokes are not starved by a chatty peer
        loop {
            match cmd_rx.try_recv() {
                Ok(Command::Send(msg)) => send_with_retry(&mut socket, msg),
                Ok(Command::Shutdown) => {
                    shutdown.store(true, Ordering::SeqCst);
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    shutdown.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }
        if shutdown.load(Ordering::SeqCst) {
            continue;
        }

        match socket.read() {
            Ok(Message::Text(text)) => emit(TransportEvent::Message(text)),
            Ok(Message::Binary(bytes)) => {
                emit(TransportEvent::Message(
                    String::from_utf8_lossy(&bytes).into_owned(),
                ));
            }
            Ok(Message::Close(frame)) => {
                let (code, reason) = match frame {
                    Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                    None => (1005, String::new()),
                };
                open.store(false, Ordering::SeqCst);
                emit(TransportEvent::Closed { code, reason });
                return;
            }
            // Ping/pong are answered internally by tungstenite
            Ok(_) => {}
            Err(WsError::Io(err)) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                open.store(false, Ordering::SeqCst);
                emit(TransportEvent::Closed {
                    code: 1006,
                    reason: "connection closed".to_string(),
                });
                return;
            }
            Err(err) => {
                tracing::debug!(error = %err, "websocket read failed");
                open.store(false, Ordering::SeqCst);
                emit(TransportEvent::Error(err.to_string()));
                emit(TransportEvent::Closed {
                    code: 1006,
                    reason: err.to_string(),
                });
                return;
            }
        }
    }
}

// A non-blocking socket can refuse a write mid-frame; retry briefly and
// otherwise leave the failure to surface on the read path.
fn send_with_retry(
    socket: &mut tungstenite::WebSocket<MaybeTlsStream<std::net::TcpStream>>,
    msg: Message,
) {
    let mut pending = Some(msg);
    for _ in 0..5 {
        let result = match pending.take() {
            Some(msg) => socket.send(msg),
            None => socket.flush(),
        };
        match result {
            Ok(()) => return,
            Err(WsError::Io(err)) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(2));
            }
            Err(err) => {
                tracing::debug!(error = %err, "websocket send failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_appends_encoded_token() {
        let url = endpoint_url("ws://localhost:5000/terminal", "a b+c").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:5000/terminal?token=a+b%2Bc"
        );
    }

    #[test]
    fn endpoint_url_rejects_http_scheme() {
        let err = endpoint_url("http://localhost:5000/terminal", "tok").unwrap_err();
        assert!(matches!(err, TransportError::UnsupportedScheme(_)));
    }

    #[test]
    fn endpoint_url_rejects_garbage() {
        assert!(endpoint_url("not a url", "tok").is_err());
    }

    #[test]
    fn terminate_control_frame_shape() {
        let frame = ControlAction::TerminateSession.to_frame();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({ "action": "terminate_session" }));
    }

    #[test]
    fn refused_connect_reports_error_then_close() {
        // Port 1 refuses immediately; the adapter must surface the
        // failure as events and become inert, not panic.
        let url = endpoint_url("ws://127.0.0.1:1/terminal", "tok").unwrap();
        let (mut transport, events) = WsTransport::open(&url, 7).unwrap();

        let (epoch, first) = events
            .recv_timeout(Duration::from_secs(5))
            .expect("connect failure event");
        assert_eq!(epoch, 7);
        assert!(matches!(first, TransportEvent::Error(_)));
        let (_, second) = events
            .recv_timeout(Duration::from_secs(5))
            .expect("close event");
        assert!(matches!(second, TransportEvent::Closed { code: 1006, .. }));

        assert!(!transport.is_open());
        // Both must be harmless after the connection died
        transport.send("ls\n");
        transport.close();
        transport.close();
    }
}
