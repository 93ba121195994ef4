//! Explicit connection lifecycle for the telemetry socket.
//!
//! The machine owns the mutable "current link" and "current timer" cells
//! directly: storing a new handle cancels the previous one, so there is never
//! more than one live connection attempt or one armed reconnect timer per
//! machine. Callbacks from connection tasks carry the generation token they
//! were started under; a stale token means the task was superseded and its
//! transition is refused.

use tokio::task::AbortHandle;
use tracing::trace;

/// State of the persistent socket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Guarded transitions for one socket connection.
///
/// `Idle → Connecting → Open → Closed → (timer) → Connecting → …`, with no
/// terminal state short of [`ConnectionStateMachine::dispose`].
pub struct ConnectionStateMachine {
    state: ConnectionState,
    generation: u64,
    link: Option<AbortHandle>,
    timer: Option<AbortHandle>,
    disposed: bool,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            generation: 0,
            link: None,
            timer: None,
            disposed: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Enter `Connecting` and hand out the generation token for the new
    /// attempt. Returns `None` while already `Connecting` or `Open` (the
    /// single-flight guard) and after disposal. Consumes any armed timer.
    pub fn begin_connect(&mut self) -> Option<u64> {
        if self.disposed {
            return None;
        }
        if matches!(self.state, ConnectionState::Connecting | ConnectionState::Open) {
            trace!(state = ?self.state, "connect ignored, attempt already live");
            return None;
        }
        self.cancel_timer();
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        Some(self.generation)
    }

    /// Store the abort handle of the task driving the current attempt.
    /// Returns false if the attempt is stale; the caller must abort the task.
    pub fn set_link(&mut self, generation: u64, handle: AbortHandle) -> bool {
        if self.disposed || generation != self.generation {
            handle.abort();
            return false;
        }
        if let Some(previous) = self.link.replace(handle) {
            previous.abort();
        }
        true
    }

    /// `Connecting → Open`. Refused for stale generations.
    pub fn mark_open(&mut self, generation: u64) -> bool {
        if self.disposed || generation != self.generation {
            return false;
        }
        self.state = ConnectionState::Open;
        true
    }

    /// `Connecting/Open → Closed`. Refused for stale generations, so a
    /// superseded task cannot close the connection that replaced it.
    pub fn mark_closed(&mut self, generation: u64) -> bool {
        if self.disposed || generation != self.generation {
            return false;
        }
        self.state = ConnectionState::Closed;
        self.link = None;
        true
    }

    /// Arm the reconnect timer, cancelling any previously armed one. A timer
    /// armed after disposal is cancelled immediately.
    pub fn arm_timer(&mut self, handle: AbortHandle) {
        if self.disposed {
            handle.abort();
            return;
        }
        self.cancel_timer();
        self.timer = Some(handle);
    }

    /// Forget the armed timer once it has fired.
    pub fn timer_fired(&mut self) {
        self.timer = None;
    }

    pub fn has_armed_timer(&self) -> bool {
        self.timer.is_some()
    }

    /// Permanent teardown: cancels the pending timer, aborts the live link
    /// and refuses all further transitions.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.cancel_timer();
        if let Some(link) = self.link.take() {
            link.abort();
        }
        self.state = ConnectionState::Closed;
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
