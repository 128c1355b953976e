//! Connection manager: one actor owning the lifecycle and its role tasks
//!
//! Commands from the caller and reports from the listener, dialer, and pump
//! tasks are handled one at a time by the actor loop, so every state change
//! and task-handle swap happens in a single place.

use super::error::ConnectionError;
use super::pump::PumpHandle;
use super::{dialer, listener, pump};
use crate::transport::{Transport, TransportStream};
use btchat_shared::state_machine::{ConnectionStateMachine, TransitionResult, Trigger};
use btchat_shared::{limits, ConnectionState, PeerIdentity};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Events emitted by the connection manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Lifecycle state changed
    StateChanged(ConnectionState),
    /// A session was established with `peer`
    Connected { peer: PeerIdentity },
    /// One read's worth of bytes from the peer
    DataReceived(Bytes),
    /// A write completed on the stream
    DataSent(Bytes),
    /// Recoverable failure; the manager falls back to listening
    TransientFailure { reason: String },
    /// The listener could not bind or accept; it is not restarted automatically
    ListenFailed { reason: String },
}

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Read buffer size for an established session
    pub read_buffer_size: usize,
    /// Upper bound on a single dial attempt
    pub connect_timeout: Duration,
    /// How long a closing session may take to shut its stream down
    pub close_grace: Duration,
    /// Capacity of the command queue
    pub command_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: limits::READ_BUFFER_SIZE,
            connect_timeout: Duration::from_secs(12),
            close_grace: Duration::from_secs(2),
            command_capacity: 100,
        }
    }
}

pub(crate) type TaskId = u64;

/// Outcomes reported by role tasks to the actor
pub(crate) enum Report<S> {
    Accepted {
        task: TaskId,
        stream: S,
        peer: PeerIdentity,
    },
    ListenFailed {
        task: TaskId,
        error: ConnectionError,
    },
    Dialed {
        task: TaskId,
        outcome: Result<(S, PeerIdentity), ConnectionError>,
    },
    Received {
        task: TaskId,
        data: Bytes,
    },
    Sent {
        task: TaskId,
        data: Bytes,
    },
    Lost {
        task: TaskId,
        error: ConnectionError,
    },
}

pub(crate) type ReportSender<S> = mpsc::UnboundedSender<Report<S>>;

enum Command {
    Start { done: oneshot::Sender<()> },
    Connect { peer: PeerIdentity, done: oneshot::Sender<()> },
    Write(Bytes),
    Stop { done: oneshot::Sender<()> },
}

/// Cloneable command side of a connection manager
#[derive(Clone)]
pub struct ConnectionHandle {
    command_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    /// Begin or resume listening; resolves once the transition is applied
    pub async fn start(&self) -> Result<(), ConnectionError> {
        self.request(|done| Command::Start { done }).await
    }

    /// Dial `peer`; resolves once the dial is in flight, not when it completes
    pub async fn connect(&self, peer: PeerIdentity) -> Result<(), ConnectionError> {
        self.request(|done| Command::Connect { peer, done }).await
    }

    /// Send `data` if connected; silently dropped otherwise
    pub async fn write(&self, data: impl Into<Bytes>) -> Result<(), ConnectionError> {
        self.command_tx
            .send(Command::Write(data.into()))
            .await
            .map_err(|_| ConnectionError::ManagerClosed)
    }

    /// Tear down every task and return to Idle
    pub async fn stop(&self) -> Result<(), ConnectionError> {
        self.request(|done| Command::Stop { done }).await
    }

    /// Current lifecycle state
    pub fn current_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<()>) -> Command,
    ) -> Result<(), ConnectionError> {
        let (done, applied) = oneshot::channel();
        self.command_tx
            .send(command(done))
            .await
            .map_err(|_| ConnectionError::ManagerClosed)?;
        applied.await.map_err(|_| ConnectionError::ManagerClosed)
    }
}

/// Manages a single peer connection over one transport
///
/// Dropping the manager (and every [`ConnectionHandle`]) stops the actor and
/// closes all sockets.
pub struct ConnectionManager {
    handle: ConnectionHandle,
    /// Channel to receive connection events
    event_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl ConnectionManager {
    /// Create a new connection manager in Idle state and spawn its actor
    pub fn new<T: Transport>(transport: T, config: ConnectionConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.command_capacity);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let actor = Actor {
            transport: Arc::new(transport),
            config,
            fsm: ConnectionStateMachine::new(),
            state_tx,
            event_tx,
            report_tx,
            listener: None,
            dialer: None,
            session: None,
            next_task: 0,
        };
        tokio::spawn(actor.run(command_rx, report_rx));

        Self {
            handle: ConnectionHandle {
                command_tx,
                state_rx,
            },
            event_rx,
        }
    }

    /// Get a clone of the command handle
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Receive the next connection event
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    pub async fn start(&self) -> Result<(), ConnectionError> {
        self.handle.start().await
    }

    pub async fn connect(&self, peer: PeerIdentity) -> Result<(), ConnectionError> {
        self.handle.connect(peer).await
    }

    pub async fn write(&self, data: impl Into<Bytes>) -> Result<(), ConnectionError> {
        self.handle.write(data).await
    }

    pub async fn stop(&self) -> Result<(), ConnectionError> {
        self.handle.stop().await
    }

    pub fn current_state(&self) -> ConnectionState {
        self.handle.current_state()
    }
}

/// A spawned listener or dialer
struct RoleTask {
    id: TaskId,
    handle: JoinHandle<()>,
}

impl RoleTask {
    /// Abort and wait until the task (and the socket it owns) is gone
    async fn cancel(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

/// The live (stream, peer, pump) triple; exists only while Connected
struct Session {
    peer: PeerIdentity,
    pump: PumpHandle,
}

struct Actor<T: Transport> {
    transport: Arc<T>,
    config: ConnectionConfig,
    fsm: ConnectionStateMachine,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    report_tx: ReportSender<T::Stream>,
    listener: Option<RoleTask>,
    dialer: Option<RoleTask>,
    session: Option<Session>,
    next_task: TaskId,
}

impl<T: Transport> Actor<T> {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<Command>,
        mut report_rx: mpsc::UnboundedReceiver<Report<T::Stream>>,
    ) {
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(report) = report_rx.recv() => self.handle_report(report).await,
            }
        }

        debug!("[CONN] All handles dropped, shutting down");
        self.stop().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { done } => {
                self.start().await;
                let _ = done.send(());
            }
            Command::Connect { peer, done } => {
                self.connect(peer).await;
                let _ = done.send(());
            }
            Command::Write(data) => self.write(data),
            Command::Stop { done } => {
                self.stop().await;
                let _ = done.send(());
            }
        }
    }

    async fn handle_report(&mut self, report: Report<T::Stream>) {
        match report {
            Report::Accepted { task, stream, peer } => {
                let current = self.listener.as_ref().map(|l| l.id) == Some(task);
                let accepting = matches!(
                    self.fsm.state(),
                    ConnectionState::Listening | ConnectionState::Connecting
                );
                if current && accepting {
                    self.established(stream, peer).await;
                } else {
                    reject(stream, &peer);
                }
            }
            Report::ListenFailed { task, error } => {
                if self.listener.as_ref().map(|l| l.id) != Some(task) {
                    return;
                }
                if let Some(listener) = self.listener.take() {
                    listener.cancel().await;
                }
                warn!("[CONN] {}", error);
                self.emit(ConnectionEvent::ListenFailed {
                    reason: error.to_string(),
                });
                self.transition(Trigger::ListenFailed);
            }
            Report::Dialed { task, outcome } => {
                if self.dialer.as_ref().map(|d| d.id) != Some(task) {
                    if let Ok((stream, peer)) = outcome {
                        reject(stream, &peer);
                    }
                    return;
                }
                if let Some(dialer) = self.dialer.take() {
                    dialer.cancel().await;
                }
                match outcome {
                    Ok((stream, peer)) => self.established(stream, peer).await,
                    Err(error) => self.recover(error).await,
                }
            }
            Report::Received { task, data } => {
                if self.is_current_pump(task) {
                    self.emit(ConnectionEvent::DataReceived(data));
                }
            }
            Report::Sent { task, data } => {
                if self.is_current_pump(task) {
                    self.emit(ConnectionEvent::DataSent(data));
                }
            }
            Report::Lost { task, error } => {
                if !self.is_current_pump(task) {
                    return;
                }
                self.close_session().await;
                self.recover(error).await;
            }
        }
    }

    async fn start(&mut self) {
        self.cancel_dialer().await;
        self.close_session().await;
        self.transition(Trigger::Start);

        // Keep a live listener rather than rebinding the service
        if let Some(listener) = self.listener.take() {
            if !listener.handle.is_finished() {
                self.listener = Some(listener);
                return;
            }
            listener.cancel().await;
        }

        let id = self.next_task_id();
        let handle = tokio::spawn(listener::run(
            id,
            self.transport.clone(),
            self.report_tx.clone(),
        ));
        self.listener = Some(RoleTask { id, handle });
    }

    async fn connect(&mut self, peer: PeerIdentity) {
        self.cancel_dialer().await;
        self.close_session().await;
        self.transition(Trigger::Connect);

        let id = self.next_task_id();
        let handle = tokio::spawn(dialer::run(
            id,
            self.transport.clone(),
            peer,
            self.config.connect_timeout,
            self.report_tx.clone(),
        ));
        self.dialer = Some(RoleTask { id, handle });
    }

    fn write(&self, data: Bytes) {
        match &self.session {
            Some(session) if self.fsm.state().is_connected() => {
                if !session.pump.send(data) {
                    debug!("[CONN] Pump already stopped, dropping write");
                }
            }
            _ => debug!(
                "[CONN] Dropping {} byte write while {}",
                data.len(),
                self.fsm.state()
            ),
        }
    }

    async fn stop(&mut self) {
        self.cancel_dialer().await;
        if let Some(listener) = self.listener.take() {
            listener.cancel().await;
        }
        self.close_session().await;
        self.transition(Trigger::Stop);
    }

    /// Promote an established stream to the session; first to complete wins
    async fn established(&mut self, stream: T::Stream, peer: PeerIdentity) {
        self.cancel_dialer().await;
        if let Some(listener) = self.listener.take() {
            listener.cancel().await;
        }
        self.close_session().await;

        let id = self.next_task_id();
        let pump = pump::spawn(id, stream, self.config.read_buffer_size, self.report_tx.clone());
        self.session = Some(Session {
            peer: peer.clone(),
            pump,
        });

        info!("[CONN] Connected to {}", peer);
        self.emit(ConnectionEvent::Connected { peer });
        self.transition(Trigger::Established);
    }

    /// Report a recoverable failure and fall back to listening
    async fn recover(&mut self, error: ConnectionError) {
        let trigger = match error {
            ConnectionError::Stream(_) => Trigger::StreamLost,
            _ => Trigger::DialFailed,
        };

        warn!("[CONN] {}", error);
        self.emit(ConnectionEvent::TransientFailure {
            reason: error.to_string(),
        });
        self.transition(trigger);
        self.start().await;
    }

    async fn cancel_dialer(&mut self) {
        if let Some(dialer) = self.dialer.take() {
            dialer.cancel().await;
        }
    }

    async fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            info!("[CONN] Closing session with {}", session.peer);
            session.pump.close(self.config.close_grace).await;
        }
    }

    fn is_current_pump(&self, task: TaskId) -> bool {
        self.session.as_ref().map(|s| s.pump.id()) == Some(task)
    }

    fn transition(&mut self, trigger: Trigger) {
        match self.fsm.process(trigger) {
            TransitionResult::Success { from, to } => {
                if from != to {
                    debug!("[CONN] {} -> {} ({:?})", from, to, trigger);
                    self.state_tx.send_replace(to);
                    self.emit(ConnectionEvent::StateChanged(to));
                }
            }
            TransitionResult::Invalid { from, trigger } => {
                debug!("[CONN] Ignoring {:?} while {}", trigger, from);
            }
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        // Nobody listening is fine; state is still queryable
        let _ = self.event_tx.send(event);
    }

    fn next_task_id(&mut self) -> TaskId {
        self.next_task += 1;
        self.next_task
    }
}

/// Close a connection that lost the race or arrived in the wrong state
fn reject<S: TransportStream>(mut stream: S, peer: &PeerIdentity) {
    info!("[CONN] Rejecting connection from {}", peer);
    tokio::spawn(async move {
        let _ = TransportStream::shutdown(&mut stream).await;
    });
}
