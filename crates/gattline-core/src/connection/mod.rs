// ── Connection abstraction ──
//
// One `Connection` manages one logical link to one peer. All state
// (lifecycle, command queues, subscriptions, timers) lives in a single
// actor task; this handle only sends it inputs and observes what it
// publishes.

mod engine;
mod queue;
mod router;
mod timer;


use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::command::{Command, CommandContext, CommandKind, CommandOutput, PendingCommand};
use crate::config::{ConnectionConfig, DEFAULT_MAX_TRANSFER_SIZE};
use crate::error::CoreError;
use crate::model::{AttributeTable, PeerAddress};
use crate::transport::{Adapter, Status, TransportEvent};

use engine::{Engine, Published};
use timer::TimerKind;

pub use router::{Notification, NotificationStream};
pub(crate) use router::Subscriber;

const EVENT_CHANNEL_SIZE: usize = 64;

// ── ConnectionState ──────────────────────────────────────────────

/// Lifecycle state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

// ── DisconnectReason ─────────────────────────────────────────────

/// The transport refused to start a connection attempt.
pub const STATUS_TRANSPORT_UNAVAILABLE: u8 = 0xff;
/// The peer did not connect within the connect timeout.
pub const STATUS_CONNECT_TIMEOUT: u8 = 0xfe;
/// The transport did not confirm a disconnect within the disconnect timeout.
pub const STATUS_DISCONNECT_TIMEOUT: u8 = 0xfd;

/// Why a connection returned to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called, or a different peer was requested.
    Requested,
    /// The transport reported the link dropped.
    LinkLost(Status),
    TransportUnavailable,
    ConnectTimeout,
    DisconnectTimeout,
    DiscoveryFailed(Status),
    /// `reset()` was called.
    Reset,
    /// The connection handle was dropped.
    Shutdown,
}

impl DisconnectReason {
    /// Status code reported alongside the disconnected event.
    pub const fn status_code(self) -> u8 {
        match self {
            Self::Requested | Self::Reset | Self::Shutdown => Status::SUCCESS.0,
            Self::LinkLost(status) | Self::DiscoveryFailed(status) => status.0,
            Self::TransportUnavailable => STATUS_TRANSPORT_UNAVAILABLE,
            Self::ConnectTimeout => STATUS_CONNECT_TIMEOUT,
            Self::DisconnectTimeout => STATUS_DISCONNECT_TIMEOUT,
        }
    }

    /// Error handed to connect waiters this reason terminates.
    pub(crate) fn connect_error(self, config: &ConnectionConfig) -> CoreError {
        match self {
            Self::ConnectTimeout => CoreError::ConnectTimeout {
                timeout_ms: millis(config.connect_timeout),
            },
            Self::TransportUnavailable => CoreError::TransportUnavailable {
                reason: "connect refused".into(),
            },
            Self::DiscoveryFailed(status) => CoreError::DiscoveryFailed { status: status.0 },
            Self::Requested
            | Self::LinkLost(_)
            | Self::DisconnectTimeout
            | Self::Reset
            | Self::Shutdown => CoreError::ConnectionLost,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("requested"),
            Self::LinkLost(status) => write!(f, "link lost ({status})"),
            Self::TransportUnavailable => f.write_str("transport unavailable"),
            Self::ConnectTimeout => f.write_str("connect timeout"),
            Self::DisconnectTimeout => f.write_str("disconnect timeout"),
            Self::DiscoveryFailed(status) => write!(f, "discovery failed ({status})"),
            Self::Reset => f.write_str("reset"),
            Self::Shutdown => f.write_str("shutdown"),
        }
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ── LifecycleEvent ───────────────────────────────────────────────

/// Broadcast to every `events()` subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Connecting { peer: PeerAddress },
    Connected { peer: PeerAddress },
    /// Discovery finished; commands can now resolve their targets.
    Ready { peer: PeerAddress, collections: usize },
    MaxTransferSizeChanged { size: u16 },
    LinkQuality { rssi: i16 },
    Disconnected {
        peer: Option<PeerAddress>,
        reason: DisconnectReason,
    },
}

// ── Actor inputs ─────────────────────────────────────────────────

pub(crate) type ConnectReply = oneshot::Sender<Result<(), CoreError>>;

/// Everything the actor reacts to, from callers, transport and timers alike.
pub(crate) enum Input {
    Connect {
        target: PeerAddress,
        reply: ConnectReply,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Reset,
    /// Queued back to back, in order.
    Submit(Vec<CommandContext>),
    /// Like `Submit`, but the first failure abandons the rest.
    SubmitLinked(Vec<CommandContext>),
    RefreshCache {
        reply: ConnectReply,
    },
    LinkQualityMonitor(Option<Duration>),
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    Timer {
        kind: TimerKind,
        generation: u64,
    },
}

// ── Connection ───────────────────────────────────────────────────

/// Handle to one logical connection.
///
/// Cheaply cloneable via `Arc<ConnectionInner>`. When the last clone is
/// dropped the actor shuts down and every pending command fails with
/// `ConnectionLost`.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    config: ConnectionConfig,
    input_tx: mpsc::UnboundedSender<Input>,
    state: watch::Receiver<ConnectionState>,
    attributes: watch::Receiver<Arc<AttributeTable>>,
    max_transfer_size: watch::Receiver<u16>,
    events: broadcast::Sender<LifecycleEvent>,
    cancel: CancellationToken,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Connection {
    /// Create a connection over `adapter` and start its actor.
    ///
    /// Must be called from within a Tokio runtime. Does NOT connect --
    /// call [`connect()`](Self::connect).
    pub fn new(config: ConnectionConfig, adapter: impl Adapter) -> Self {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Idle);
        let (attributes_tx, attributes) = watch::channel(Arc::new(AttributeTable::default()));
        let (transfer_tx, max_transfer_size) = watch::channel(DEFAULT_MAX_TRANSFER_SIZE);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let cancel = CancellationToken::new();

        let engine = Engine::new(
            config.clone(),
            Box::new(adapter),
            input_tx.clone(),
            Published {
                state: state_tx,
                attributes: attributes_tx,
                max_transfer_size: transfer_tx,
                events: events.clone(),
            },
        );
        tokio::spawn(run_actor(engine, input_rx, cancel.clone()));

        Self {
            inner: Arc::new(ConnectionInner {
                config,
                input_tx,
                state,
                attributes,
                max_transfer_size,
                events,
                cancel,
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    // ── Observation ──────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch lifecycle state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    /// Subscribe to lifecycle events raised from now on.
    pub fn events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    /// Attribute table from the last discovery. Empty while not connected.
    pub fn attributes(&self) -> Arc<AttributeTable> {
        self.inner.attributes.borrow().clone()
    }

    /// Transfer size currently in effect.
    pub fn max_transfer_size(&self) -> u16 {
        *self.inner.max_transfer_size.borrow()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Connect to `target`. Resolves once attributes are discovered.
    ///
    /// Connecting to the peer already connected succeeds immediately. A
    /// different peer disconnects the current one first.
    pub async fn connect(&self, target: PeerAddress) -> Result<(), CoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Input::Connect { target, reply })?;
        rx.await.unwrap_or(Err(CoreError::ConnectionLost))
    }

    /// Disconnect and wait until the connection is idle.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Input::Disconnect { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Drop to idle immediately, releasing the link and failing everything pending.
    pub fn reset(&self) {
        let _ = self.send(Input::Reset);
    }

    /// Stop the actor. Pending commands fail with `ConnectionLost`.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Queue a command. Fails synchronously unless connected.
    pub fn submit(&self, command: Command) -> Result<PendingCommand, CoreError> {
        self.gate(&command)?;
        let (ctx, pending) = CommandContext::new(command);
        self.send(Input::Submit(vec![ctx]))?;
        Ok(pending)
    }

    /// Queue several commands contiguously; nothing else interleaves.
    pub fn submit_all(
        &self,
        commands: impl IntoIterator<Item = Command>,
    ) -> Result<Vec<PendingCommand>, CoreError> {
        let (contexts, pending) = self.contexts(commands)?;
        self.send(Input::Submit(contexts))?;
        Ok(pending)
    }

    /// Like [`submit_all`](Self::submit_all), except that once one command
    /// fails every later one still queued fails with the same error and
    /// never reaches the peer.
    pub fn submit_linked(
        &self,
        commands: impl IntoIterator<Item = Command>,
    ) -> Result<Vec<PendingCommand>, CoreError> {
        let (contexts, pending) = self.contexts(commands)?;
        self.send(Input::SubmitLinked(contexts))?;
        Ok(pending)
    }

    fn contexts(
        &self,
        commands: impl IntoIterator<Item = Command>,
    ) -> Result<(Vec<CommandContext>, Vec<PendingCommand>), CoreError> {
        let commands: Vec<Command> = commands.into_iter().collect();
        for command in &commands {
            self.gate(command)?;
        }
        Ok(commands.into_iter().map(CommandContext::new).unzip())
    }

    /// Submit and wait for the result.
    pub async fn execute(&self, command: Command) -> Result<CommandOutput, CoreError> {
        self.submit(command)?.await
    }

    pub async fn read(&self, collection: Uuid, item: Uuid) -> Result<Bytes, CoreError> {
        self.execute(Command::read(collection, item))
            .await
            .map(CommandOutput::into_bytes)
    }

    pub async fn write(
        &self,
        collection: Uuid,
        item: Uuid,
        payload: impl Into<Bytes>,
    ) -> Result<(), CoreError> {
        self.execute(Command::write(collection, item, payload))
            .await
            .map(drop)
    }

    pub async fn write_no_ack(
        &self,
        collection: Uuid,
        item: Uuid,
        payload: impl Into<Bytes>,
    ) -> Result<(), CoreError> {
        self.execute(Command::write_no_ack(collection, item, payload))
            .await
            .map(drop)
    }

    pub async fn read_descriptor(
        &self,
        collection: Uuid,
        item: Uuid,
        sub_item: Uuid,
    ) -> Result<Bytes, CoreError> {
        self.execute(Command::read_descriptor(collection, item, sub_item))
            .await
            .map(CommandOutput::into_bytes)
    }

    pub async fn write_descriptor(
        &self,
        collection: Uuid,
        item: Uuid,
        sub_item: Uuid,
        payload: impl Into<Bytes>,
    ) -> Result<(), CoreError> {
        self.execute(Command::write_descriptor(collection, item, sub_item, payload))
            .await
            .map(drop)
    }

    /// Ask the peer for a larger transfer size. Returns the size granted.
    pub async fn request_max_transfer_size(&self, size: u16) -> Result<u16, CoreError> {
        match self.execute(Command::request_max_transfer_size(size)).await? {
            CommandOutput::MaxTransferSize(granted) => Ok(granted),
            other => Err(CoreError::Internal(format!(
                "unexpected transfer size outcome: {other:?}"
            ))),
        }
    }

    /// Write `data` as consecutive `chunk_size` pieces, `gap` apart.
    ///
    /// Chunks are queued contiguously, so no other command lands between
    /// them. The first chunk goes out without delay. When a chunk fails the
    /// remaining ones are abandoned and the error is returned.
    pub async fn write_chunked(
        &self,
        collection: Uuid,
        item: Uuid,
        data: impl Into<Bytes>,
        chunk_size: usize,
        gap: Duration,
        ack: bool,
    ) -> Result<(), CoreError> {
        if chunk_size == 0 {
            return Err(CoreError::InvalidCommand {
                reason: "chunk size must be positive".into(),
            });
        }
        let data: Bytes = data.into();
        if data.is_empty() {
            let command = if ack {
                Command::write(collection, item, data)
            } else {
                Command::write_no_ack(collection, item, data)
            };
            return self.execute(command).await.map(drop);
        }

        let chunks = (0..data.len()).step_by(chunk_size).enumerate().map(|(i, start)| {
            let end = start.saturating_add(chunk_size).min(data.len());
            let piece = data.slice(start..end);
            let command = if ack {
                Command::write(collection, item, piece)
            } else {
                Command::write_no_ack(collection, item, piece)
            };
            if i == 0 { command } else { command.with_delay(gap) }
        });

        let pending = self.submit_linked(chunks.collect::<Vec<_>>())?;
        debug!(chunks = pending.len(), total = data.len(), "chunked write queued");
        for chunk in pending {
            chunk.await?;
        }
        Ok(())
    }

    // ── Notifications ────────────────────────────────────────────

    /// Enable change notifications and return the stream they arrive on.
    pub async fn enable_notify(
        &self,
        collection: Uuid,
        item: Uuid,
    ) -> Result<NotificationStream, CoreError> {
        self.subscribe(Command::enable_notify(collection, item)).await
    }

    /// Like [`enable_notify`](Self::enable_notify) but with a prepared
    /// `EnableNotify` command, e.g. to attach a tag or pin an instance.
    pub async fn subscribe(&self, command: Command) -> Result<NotificationStream, CoreError> {
        if command.kind() != CommandKind::EnableNotify {
            return Err(CoreError::InvalidCommand {
                reason: format!("expected enable-notify, got {}", command.kind()),
            });
        }
        self.gate(&command)?;

        let (subscriber, stream) = NotificationStream::channel();
        let (ctx, pending) = CommandContext::new(command);
        self.send(Input::Submit(vec![ctx.with_subscriber(subscriber)]))?;
        pending.await?;
        Ok(stream)
    }

    /// Disable change notifications. A no-op success without a subscription.
    pub async fn disable_notify(&self, collection: Uuid, item: Uuid) -> Result<(), CoreError> {
        self.execute(Command::disable_notify(collection, item))
            .await
            .map(drop)
    }

    // ── Maintenance ──────────────────────────────────────────────

    /// Drop the link's attribute cache and rediscover.
    pub async fn refresh_cache(&self) -> Result<(), CoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Input::RefreshCache { reply })?;
        rx.await.unwrap_or(Err(CoreError::ConnectionLost))
    }

    /// Poll link quality every `interval` while connected. Zero uses the default.
    pub fn start_link_quality_monitor(&self, interval: Duration) {
        let _ = self.send(Input::LinkQualityMonitor(Some(interval)));
    }

    pub fn stop_link_quality_monitor(&self) {
        let _ = self.send(Input::LinkQualityMonitor(None));
    }

    // ── Internals ────────────────────────────────────────────────

    fn gate(&self, command: &Command) -> Result<(), CoreError> {
        if self.state() != ConnectionState::Connected {
            return Err(CoreError::NotConnected);
        }
        command.validate()
    }

    fn send(&self, input: Input) -> Result<(), CoreError> {
        self.inner
            .input_tx
            .send(input)
            .map_err(|_| CoreError::ConnectionLost)
    }
}

// ── Actor task ───────────────────────────────────────────────────

async fn run_actor(
    mut engine: Engine,
    mut rx: mpsc::UnboundedReceiver<Input>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            input = rx.recv() => {
                let Some(input) = input else { break };
                engine.handle(input);
            }
        }
    }
    engine.shutdown();
    debug!("connection actor stopped");
}
