//! WebSocket telemetry client with automatic reconnection.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::state::{ConnectionState, ConnectionStateMachine};
use super::{Snapshot, TelemetryError};

/// Holds at most one live socket to the telemetry endpoint, repairs it after
/// failure with a fixed delay, and republishes the latest snapshot.
///
/// Publication is last-write-wins over `watch` channels: observers see the
/// most recent snapshot, connection state and transient error, never a backlog
/// of missed frames.
pub struct TelemetryClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    url: String,
    reconnect_delay: Duration,
    machine: Mutex<ConnectionStateMachine>,
    state_tx: watch::Sender<ConnectionState>,
    snapshot_tx: watch::Sender<Option<Snapshot>>,
    error_tx: watch::Sender<Option<TelemetryError>>,
}

impl TelemetryClient {
    pub fn new(url: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                url: url.into(),
                reconnect_delay,
                machine: Mutex::new(ConnectionStateMachine::new()),
                state_tx: watch::Sender::new(ConnectionState::Idle),
                snapshot_tx: watch::Sender::new(None),
                error_tx: watch::Sender::new(None),
            }),
        }
    }

    /// Open the connection. A no-op while an attempt is already live, so
    /// repeated calls never produce duplicate connections.
    pub fn connect(&self) {
        ClientInner::spawn_connect(&self.inner);
    }

    /// Permanent teardown: cancels any pending reconnect timer and forcibly
    /// closes an open or connecting socket. Idempotent.
    pub fn dispose(&self) {
        let was_disposed = {
            let mut machine = self.inner.machine.lock().unwrap();
            let was = machine.is_disposed();
            machine.dispose();
            was
        };
        if !was_disposed {
            info!("telemetry client disposed");
            self.inner.state_tx.send_replace(ConnectionState::Closed);
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Latest successfully parsed snapshot, if any frame has arrived yet.
    pub fn latest_snapshot(&self) -> Option<Snapshot> {
        self.inner.snapshot_tx.borrow().clone()
    }

    /// Most recent surfaced error. Cleared on `Open` and on every valid frame.
    pub fn last_error(&self) -> Option<TelemetryError> {
        self.inner.error_tx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<Option<Snapshot>> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn subscribe_error(&self) -> watch::Receiver<Option<TelemetryError>> {
        self.inner.error_tx.subscribe()
    }
}

impl Drop for TelemetryClient {
    fn drop(&mut self) {
        // Owned handles inside the machine must not outlive the client
        if let Ok(mut machine) = self.inner.machine.lock() {
            machine.dispose();
        }
    }
}

impl ClientInner {
    /// Start a connection attempt, guarded by the state machine.
    fn spawn_connect(inner: &Arc<ClientInner>) {
        let generation = {
            let mut machine = inner.machine.lock().unwrap();
            match machine.begin_connect() {
                Some(generation) => generation,
                None => return,
            }
        };
        inner.state_tx.send_replace(ConnectionState::Connecting);

        let task_inner = Arc::clone(inner);
        let handle = tokio::spawn(async move {
            ClientInner::run_link(task_inner, generation).await;
        });

        let mut machine = inner.machine.lock().unwrap();
        machine.set_link(generation, handle.abort_handle());
    }

    /// Dial the socket and pump frames until it closes or errors.
    async fn run_link(inner: Arc<ClientInner>, generation: u64) {
        debug!(url = %inner.url, "connecting to telemetry socket");

        match connect_async(inner.url.as_str()).await {
            Ok((ws_stream, _)) => {
                {
                    let mut machine = inner.machine.lock().unwrap();
                    if !machine.mark_open(generation) {
                        return;
                    }
                }
                info!("telemetry socket open");
                inner.state_tx.send_replace(ConnectionState::Open);
                inner.error_tx.send_replace(None);

                let (_, mut read) = ws_stream.split();
                loop {
                    match read.next().await {
                        Some(Ok(Message::Text(text))) => inner.handle_frame(&text),
                        Some(Ok(Message::Close(_))) | None => {
                            info!("telemetry socket closed by server");
                            break;
                        }
                        Some(Ok(_)) => {
                            // Ping/Pong are answered by tungstenite; binary
                            // frames are not part of the contract
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "telemetry socket read error");
                            inner
                                .error_tx
                                .send_replace(Some(TelemetryError::Transport(e.to_string())));
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "telemetry connect failed");
                inner
                    .error_tx
                    .send_replace(Some(TelemetryError::Transport(e.to_string())));
            }
        }

        ClientInner::on_closed(inner, generation);
    }

    /// Parse one inbound frame. A malformed frame is dropped and surfaced as
    /// a recoverable error without closing the connection.
    fn handle_frame(&self, text: &str) {
        match serde_json::from_str::<Snapshot>(text) {
            Ok(snapshot) => {
                self.snapshot_tx.send_replace(Some(snapshot));
                self.error_tx.send_replace(None);
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed telemetry frame");
                self.error_tx
                    .send_replace(Some(TelemetryError::Parse(e.to_string())));
            }
        }
    }

    /// Transition to `Closed` and arm exactly one reconnect timer.
    fn on_closed(inner: Arc<ClientInner>, generation: u64) {
        {
            let mut machine = inner.machine.lock().unwrap();
            if !machine.mark_closed(generation) {
                return;
            }
        }
        inner.state_tx.send_replace(ConnectionState::Closed);
        ClientInner::schedule_reconnect(&inner);
    }

    fn schedule_reconnect(inner: &Arc<ClientInner>) {
        let delay = inner.reconnect_delay;
        debug!(delay_ms = delay.as_millis() as u64, "scheduling reconnect");

        let timer_inner = Arc::clone(inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut machine = timer_inner.machine.lock().unwrap();
                if machine.is_disposed() {
                    return;
                }
                machine.timer_fired();
            }
            ClientInner::spawn_connect(&timer_inner);
        });

        let mut machine = inner.machine.lock().unwrap();
        machine.arm_timer(handle.abort_handle());
    }
}
