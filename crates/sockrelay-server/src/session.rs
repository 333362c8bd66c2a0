//! Peer session lifecycle and registry.
//!
//! A [`Session`] moves strictly forward through
//! `Connecting → Active → Draining → Closed`. Entering `Draining` cancels the
//! session's `done` token exactly once; the outbound batcher observes it and
//! returns, after which the coordinator releases the socket and marks the
//! session `Closed`.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::close_code;
use dashmap::DashMap;
use parking_lot::Mutex;
use sockrelay_core::{CodecError, QueueError, RelayError, SessionId};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Socket accepted, relay halves starting.
    Connecting,
    /// Both relay halves running.
    Active,
    /// Termination signalled; the batcher is winding down.
    Draining,
    /// Socket released.
    Closed,
}

impl SessionState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Active | Self::Draining)
                | (Self::Active, Self::Draining)
                | (Self::Draining, Self::Closed)
        )
    }

    /// Lowercase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session left `Active`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the socket or the transport failed on read.
    PeerDisconnected,
    /// An inbound frame was not a JSON array of messages.
    MalformedFrame,
    /// A frame write was rejected by the transport.
    WriteFailed,
    /// A frame write missed its deadline.
    WriteTimeout,
    /// The engine did not take inbound messages in time.
    ForwardStalled,
    /// The engine dropped its side of a queue.
    EngineClosed,
    /// A newer peer connection replaced this one.
    Superseded,
    /// The server is shutting down.
    Shutdown,
}

impl CloseReason {
    /// Snake-case name for logs and close frames.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PeerDisconnected => "peer_disconnected",
            Self::MalformedFrame => "malformed_frame",
            Self::WriteFailed => "write_failed",
            Self::WriteTimeout => "write_timeout",
            Self::ForwardStalled => "forward_stalled",
            Self::EngineClosed => "engine_closed",
            Self::Superseded => "superseded",
            Self::Shutdown => "shutdown",
        }
    }

    /// WebSocket close code sent to the peer.
    pub fn close_code(self) -> u16 {
        match self {
            Self::PeerDisconnected => close_code::NORMAL,
            Self::MalformedFrame => close_code::INVALID,
            Self::WriteFailed | Self::WriteTimeout | Self::EngineClosed => close_code::ERROR,
            Self::ForwardStalled => close_code::AGAIN,
            Self::Superseded => close_code::POLICY,
            Self::Shutdown => close_code::AWAY,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&RelayError> for CloseReason {
    fn from(err: &RelayError) -> Self {
        match err {
            RelayError::Codec(CodecError::Malformed(_)) => Self::MalformedFrame,
            RelayError::Codec(CodecError::Encode(_)) | RelayError::Write(_) => Self::WriteFailed,
            RelayError::WriteTimeout(_) => Self::WriteTimeout,
            RelayError::Queue(QueueError::ForwardTimeout(_)) => Self::ForwardStalled,
            RelayError::Queue(QueueError::EngineClosed) => Self::EngineClosed,
            RelayError::Read(_) => Self::PeerDisconnected,
        }
    }
}

struct SessionInner {
    state: SessionState,
    close_reason: Option<CloseReason>,
}

/// One peer connection and its lifecycle state.
pub struct Session {
    id: SessionId,
    inner: Mutex<SessionInner>,
    done: CancellationToken,
    connected_at: Instant,
}

impl Session {
    /// Create a session in `Connecting`.
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Connecting,
                close_reason: None,
            }),
            done: CancellationToken::new(),
            connected_at: Instant::now(),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// The reason recorded by the first `begin_draining` call.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.lock().close_reason
    }

    /// Termination signal, cancelled on entry to `Draining`.
    pub fn done(&self) -> &CancellationToken {
        &self.done
    }

    /// Time since the socket was accepted.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// `Connecting → Active`. Returns `false` if the session already left
    /// `Connecting`.
    pub fn activate(&self) -> bool {
        self.transition(SessionState::Active)
    }

    /// Enter `Draining` and fire the termination signal.
    ///
    /// Only the first call has any effect; it returns `true` and its
    /// `reason` is the one recorded.
    pub fn begin_draining(&self, reason: CloseReason) -> bool {
        let mut inner = self.inner.lock();
        if !inner.state.can_transition_to(SessionState::Draining) {
            return false;
        }
        inner.state = SessionState::Draining;
        inner.close_reason = Some(reason);
        drop(inner);
        self.done.cancel();
        true
    }

    /// `Draining → Closed`.
    pub fn close(&self) -> bool {
        self.transition(SessionState::Closed)
    }

    fn transition(&self, next: SessionState) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.can_transition_to(next) {
            inner.state = next;
            true
        } else {
            false
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of live sessions keyed by ID.
///
/// At most one session relays at a time: registering a new one drains every
/// older session with [`CloseReason::Superseded`], which releases the
/// outbound queue to the newcomer.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    register_lock: Mutex<()>,
    emptied: Notify,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            register_lock: Mutex::new(()),
            emptied: Notify::new(),
        }
    }

    /// Create and register a fresh session, superseding any live one.
    pub fn register(&self) -> Arc<Session> {
        let _guard = self.register_lock.lock();
        for entry in self.sessions.iter() {
            if entry.value().begin_draining(CloseReason::Superseded) {
                info!(session_id = %entry.key(), "session superseded by new peer");
            }
        }
        let session = Arc::new(Session::new());
        let _ = self.sessions.insert(session.id().clone(), Arc::clone(&session));
        session
    }

    /// Remove a session by ID.
    pub fn unregister(&self, id: &SessionId) {
        if self.sessions.remove(id).is_some() && self.sessions.is_empty() {
            self.emptied.notify_waiters();
        }
    }

    /// Number of registered sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions currently in `Active`.
    pub fn active(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().state() == SessionState::Active)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Drain every session. Returns how many were newly drained.
    pub fn drain_all(&self, reason: CloseReason) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().begin_draining(reason))
            .count()
    }

    /// Resolve once no session is registered.
    pub async fn wait_empty(&self) {
        loop {
            let notified = self.emptied.notified();
            if self.sessions.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
