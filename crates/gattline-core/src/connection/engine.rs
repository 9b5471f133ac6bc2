// ── Connection engine ──
//
// The state machine, dispatcher and router glue, driven one input at a
// time by the actor task. Nothing here is shared: `&mut self` is the lock.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::queue::CommandQueue;
use super::router::NotificationRouter;
use super::timer::{TimerKind, Timers};
use super::{
    ConnectReply, ConnectionState, DisconnectReason, Input, LifecycleEvent, millis,
};
use crate::command::{Command, CommandContext, CommandKind, CommandOutput, IssuedTarget};
use crate::config::{
    ConnectionConfig, DEFAULT_LINK_QUALITY_INTERVAL, DEFAULT_MAX_TRANSFER_SIZE,
    MAX_TRANSFER_SIZE_LIMIT,
};
use crate::error::CoreError;
use crate::model::{
    AttributeTable, CLIENT_CONFIG_UUID, Collection, IdentityKey, ItemProperties, PeerAddress,
};
use crate::transport::{Adapter, EventSink, Link, LinkState, Status, TransportEvent};

/// Channels the engine publishes through; the handle holds the receivers.
pub(crate) struct Published {
    pub state: watch::Sender<ConnectionState>,
    pub attributes: watch::Sender<Arc<AttributeTable>>,
    pub max_transfer_size: watch::Sender<u16>,
    pub events: broadcast::Sender<LifecycleEvent>,
}

/// Which asynchronous outcome arrived, for matching against the in-flight command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    ItemRead,
    ItemWritten,
    SubItemRead,
    SubItemWritten,
    MaxTransferSize,
}

impl Completion {
    fn answers(self, kind: CommandKind) -> bool {
        matches!(
            (self, kind),
            (Self::ItemRead, CommandKind::Read)
                | (Self::ItemWritten, CommandKind::Write | CommandKind::WriteNoAck)
                | (Self::SubItemRead, CommandKind::ReadDescriptor)
                | (Self::SubItemWritten, CommandKind::WriteDescriptor)
                | (Self::MaxTransferSize, CommandKind::RequestMaxTransferSize)
        )
    }
}

pub(crate) struct Engine {
    config: ConnectionConfig,
    adapter: Box<dyn Adapter>,
    link: Option<Box<dyn Link>>,
    /// Bumped on every open so events from a released link are recognisable.
    link_generation: u64,
    peer: Option<PeerAddress>,
    pending_reconnect: Option<PeerAddress>,
    disconnect_reason: Option<DisconnectReason>,
    connect_waiters: Vec<ConnectReply>,
    disconnect_waiters: Vec<oneshot::Sender<()>>,
    attributes: Option<Arc<AttributeTable>>,
    link_quality_interval: Option<Duration>,
    queue: CommandQueue,
    /// Last id handed to a linked batch.
    batch_seq: u64,
    router: NotificationRouter,
    timers: Timers,
    tx: mpsc::UnboundedSender<Input>,
    published: Published,
}

impl Engine {
    pub fn new(
        config: ConnectionConfig,
        adapter: Box<dyn Adapter>,
        tx: mpsc::UnboundedSender<Input>,
        published: Published,
    ) -> Self {
        let link_quality_interval = config.link_quality_interval.map(normalize_interval);
        Self {
            config,
            adapter,
            link: None,
            link_generation: 0,
            peer: None,
            pending_reconnect: None,
            disconnect_reason: None,
            connect_waiters: Vec::new(),
            disconnect_waiters: Vec::new(),
            attributes: None,
            link_quality_interval,
            queue: CommandQueue::default(),
            batch_seq: 0,
            router: NotificationRouter::default(),
            timers: Timers::new(tx.clone()),
            tx,
            published,
        }
    }

    pub fn handle(&mut self, input: Input) {
        match input {
            Input::Connect { target, reply } => self.connect(target, reply),
            Input::Disconnect { reply } => self.disconnect(reply),
            Input::Reset => {
                info!("forced reset");
                self.pending_reconnect = None;
                self.go_idle(DisconnectReason::Reset);
            }
            Input::Submit(batch) => self.submit(batch),
            Input::SubmitLinked(mut batch) => {
                self.batch_seq += 1;
                for ctx in &mut batch {
                    ctx.batch = Some(self.batch_seq);
                }
                self.submit(batch);
            }
            Input::RefreshCache { reply } => self.refresh_cache(reply),
            Input::LinkQualityMonitor(interval) => self.set_link_quality_monitor(interval),
            Input::Transport { generation, event } => {
                if self.link.is_none() || generation != self.link_generation {
                    trace!(generation, "event from released link dropped");
                    return;
                }
                self.on_transport(event);
            }
            Input::Timer { kind, generation } => {
                if !self.timers.fire(kind, generation) {
                    trace!(timer = %kind, generation, "stale timer fire ignored");
                    return;
                }
                self.on_timer(kind);
            }
        }
    }

    /// Final teardown when the actor stops.
    pub fn shutdown(&mut self) {
        self.pending_reconnect = None;
        self.go_idle(DisconnectReason::Shutdown);
    }

    // ── State ────────────────────────────────────────────────────

    fn state(&self) -> ConnectionState {
        *self.published.state.borrow()
    }

    /// The single place connection state changes.
    fn transition(&mut self, next: ConnectionState) {
        let previous = self.published.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "connection state changed");
        }
    }

    fn emit(&self, event: LifecycleEvent) {
        // No receivers is fine
        let _ = self.published.events.send(event);
    }

    // ── Lifecycle ────────────────────────────────────────────────

    fn connect(&mut self, target: PeerAddress, reply: ConnectReply) {
        let same_peer = self.peer == Some(target);
        match self.state() {
            ConnectionState::Idle => {
                self.connect_waiters.push(reply);
                self.open(target);
            }
            ConnectionState::Connecting if same_peer => self.connect_waiters.push(reply),
            ConnectionState::Connecting => {
                info!(%target, "different peer requested while connecting, restarting");
                self.fail_connect_waiters(&CoreError::ConnectionLost);
                self.connect_waiters.push(reply);
                self.pending_reconnect = Some(target);
                self.go_idle(DisconnectReason::Requested);
            }
            ConnectionState::Connected if same_peer => {
                if self.attributes.is_some() {
                    let _ = reply.send(Ok(()));
                } else {
                    self.connect_waiters.push(reply);
                    self.discover();
                }
            }
            ConnectionState::Connected => {
                info!(%target, "different peer requested, disconnecting first");
                self.fail_connect_waiters(&CoreError::ConnectionLost);
                self.connect_waiters.push(reply);
                self.pending_reconnect = Some(target);
                self.begin_disconnect(DisconnectReason::Requested);
            }
            ConnectionState::Disconnecting => {
                self.connect_waiters.push(reply);
                self.pending_reconnect = Some(target);
            }
        }
    }

    fn open(&mut self, target: PeerAddress) {
        self.link_generation += 1;
        self.peer = Some(target);
        self.transition(ConnectionState::Connecting);
        self.emit(LifecycleEvent::Connecting { peer: target });

        let sink = EventSink::new(self.link_generation, self.tx.clone());
        match self.adapter.open(&target, sink) {
            Ok(link) => {
                debug!(%target, generation = self.link_generation, "connect issued");
                self.link = Some(link);
                if !self.config.connect_timeout.is_zero() {
                    self.timers.arm(TimerKind::Connect, self.config.connect_timeout);
                }
            }
            Err(e) => {
                warn!(%target, error = %e, "transport refused connect");
                let error = CoreError::TransportUnavailable {
                    reason: e.to_string(),
                };
                self.go_idle_with(DisconnectReason::TransportUnavailable, &error);
            }
        }
    }

    fn disconnect(&mut self, reply: oneshot::Sender<()>) {
        self.pending_reconnect = None;
        if self.state() == ConnectionState::Idle {
            let _ = reply.send(());
            return;
        }
        self.disconnect_waiters.push(reply);
        self.begin_disconnect(DisconnectReason::Requested);
    }

    fn begin_disconnect(&mut self, reason: DisconnectReason) {
        match self.state() {
            ConnectionState::Idle | ConnectionState::Disconnecting => {}
            ConnectionState::Connecting => self.go_idle(reason),
            ConnectionState::Connected => {
                self.transition(ConnectionState::Disconnecting);
                self.disconnect_reason = Some(reason);
                self.timers.cancel(TimerKind::Command);
                self.timers.cancel(TimerKind::Delay);
                self.timers.cancel(TimerKind::LinkQuality);

                let accepted = match self.link.as_mut() {
                    Some(link) => link.disconnect(),
                    None => {
                        self.go_idle(reason);
                        return;
                    }
                };
                match accepted {
                    Ok(()) => self
                        .timers
                        .arm(TimerKind::Disconnect, self.config.disconnect_timeout),
                    Err(e) => {
                        warn!(error = %e, "disconnect rejected, releasing link");
                        self.go_idle(reason);
                    }
                }
            }
        }
    }

    fn go_idle(&mut self, reason: DisconnectReason) {
        let error = reason.connect_error(&self.config);
        self.go_idle_with(reason, &error);
    }

    /// Every path to `Idle` ends here. State flips first; pending work is
    /// failed afterwards.
    fn go_idle_with(&mut self, reason: DisconnectReason, connect_error: &CoreError) {
        let previous = self.state();
        if let Some(mut link) = self.link.take() {
            let still_up = matches!(
                previous,
                ConnectionState::Connecting | ConnectionState::Connected
            );
            if still_up && !matches!(reason, DisconnectReason::LinkLost(_)) {
                if let Err(e) = link.disconnect() {
                    debug!(error = %e, "disconnect during release failed");
                }
            }
            link.close();
        }
        self.timers.cancel_all();
        self.disconnect_reason = None;
        self.transition(ConnectionState::Idle);

        let pending = self.queue.drain_all();
        if !pending.is_empty() {
            debug!(count = pending.len(), "failing pending commands");
        }
        for ctx in pending {
            ctx.resolve(Err(CoreError::ConnectionLost));
        }
        self.router.clear();
        self.attributes = None;
        self.published
            .attributes
            .send_replace(Arc::new(AttributeTable::default()));
        self.published
            .max_transfer_size
            .send_replace(DEFAULT_MAX_TRANSFER_SIZE);

        for waiter in self.disconnect_waiters.drain(..) {
            let _ = waiter.send(());
        }

        let peer = self.peer.take();
        if previous != ConnectionState::Idle {
            info!(
                peer = ?peer.map(|p| p.to_string()),
                %reason,
                status = reason.status_code(),
                "disconnected"
            );
            self.emit(LifecycleEvent::Disconnected { peer, reason });
        }

        if let Some(next) = self.pending_reconnect.take() {
            debug!(%next, "opening pending reconnect");
            self.open(next);
            return;
        }
        self.fail_connect_waiters(connect_error);
    }

    fn fail_connect_waiters(&mut self, error: &CoreError) {
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    fn discover(&mut self) {
        let accepted = match self.link.as_mut() {
            Some(link) => link.discover_collections(),
            None => return,
        };
        if let Err(e) = accepted {
            warn!(error = %e, "discovery request rejected");
            self.begin_disconnect(DisconnectReason::DiscoveryFailed(Status::FAILURE));
        }
    }

    // ── Transport events ─────────────────────────────────────────

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Lifecycle {
                state: LinkState::Connected,
                ..
            } => self.on_link_up(),
            TransportEvent::Lifecycle {
                state: LinkState::Disconnected,
                status,
            } => self.on_link_down(status),
            TransportEvent::CollectionsDiscovered(result) => self.on_discovered(result),
            TransportEvent::ItemRead {
                item,
                status,
                payload,
            } => self.complete(
                Completion::ItemRead,
                Some(target(item, None)),
                status,
                CommandOutput::Value(payload),
            ),
            TransportEvent::ItemWritten { item, status } => self.complete(
                Completion::ItemWritten,
                Some(target(item, None)),
                status,
                CommandOutput::Done,
            ),
            TransportEvent::SubItemRead {
                item,
                sub_item,
                status,
                payload,
            } => self.complete(
                Completion::SubItemRead,
                Some(target(item, Some(sub_item))),
                status,
                CommandOutput::Value(payload),
            ),
            TransportEvent::SubItemWritten {
                item,
                sub_item,
                status,
            } => self.complete(
                Completion::SubItemWritten,
                Some(target(item, Some(sub_item))),
                status,
                CommandOutput::Done,
            ),
            TransportEvent::ChangeEvent { item, payload } => {
                self.router.route(&item, payload);
            }
            TransportEvent::MaxTransferSizeChanged { size, status } => {
                self.on_transfer_size(size, status);
            }
            TransportEvent::LinkQualityRead { rssi, status } => {
                if status.is_success() && self.state() == ConnectionState::Connected {
                    trace!(rssi, "link quality");
                    self.emit(LifecycleEvent::LinkQuality { rssi });
                } else {
                    debug!(%status, "link quality read failed");
                }
            }
        }
    }

    fn on_link_up(&mut self) {
        if self.state() != ConnectionState::Connecting {
            debug!(state = %self.state(), "link up outside connecting ignored");
            return;
        }
        self.timers.cancel(TimerKind::Connect);
        self.transition(ConnectionState::Connected);
        if let Some(peer) = self.peer {
            info!(%peer, "connected");
            self.emit(LifecycleEvent::Connected { peer });
        }
        if let Some(interval) = self.link_quality_interval {
            self.timers.arm(TimerKind::LinkQuality, interval);
        }
        self.discover();
    }

    fn on_link_down(&mut self, status: Status) {
        match self.state() {
            ConnectionState::Idle => {}
            ConnectionState::Disconnecting => {
                let reason = self
                    .disconnect_reason
                    .unwrap_or(DisconnectReason::Requested);
                self.go_idle(reason);
            }
            ConnectionState::Connecting | ConnectionState::Connected => {
                warn!(%status, "link lost");
                self.go_idle(DisconnectReason::LinkLost(status));
            }
        }
    }

    fn on_discovered(&mut self, result: Result<Vec<Collection>, Status>) {
        if self.state() != ConnectionState::Connected {
            debug!("discovery result outside connected ignored");
            return;
        }
        match result {
            Ok(collections) => {
                let table = Arc::new(AttributeTable::new(collections));
                info!(collections = table.len(), "attributes discovered");
                self.attributes = Some(Arc::clone(&table));
                self.published.attributes.send_replace(Arc::clone(&table));

                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                if let Some(peer) = self.peer {
                    self.emit(LifecycleEvent::Ready {
                        peer,
                        collections: table.len(),
                    });
                }

                let negotiated =
                    *self.published.max_transfer_size.borrow() != DEFAULT_MAX_TRANSFER_SIZE;
                if self.config.negotiates_transfer_size() && !negotiated {
                    let size = self.config.max_transfer_size.min(MAX_TRANSFER_SIZE_LIMIT);
                    self.queue.push_front(CommandContext::internal(
                        Command::request_max_transfer_size(size),
                        "transfer size negotiation",
                    ));
                }
                self.drain();
            }
            Err(status) => {
                warn!(%status, "discovery failed");
                self.begin_disconnect(DisconnectReason::DiscoveryFailed(status));
            }
        }
    }

    fn on_transfer_size(&mut self, size: u16, status: Status) {
        if status.is_success() && self.state() == ConnectionState::Connected {
            let previous = self.published.max_transfer_size.send_replace(size);
            if previous != size {
                info!(size, "max transfer size changed");
                self.emit(LifecycleEvent::MaxTransferSizeChanged { size });
            }
        }
        self.complete(
            Completion::MaxTransferSize,
            None,
            status,
            CommandOutput::MaxTransferSize(size),
        );
    }

    // ── Dispatcher ───────────────────────────────────────────────

    fn submit(&mut self, batch: Vec<CommandContext>) {
        if self.state() != ConnectionState::Connected {
            for ctx in batch {
                ctx.resolve(Err(CoreError::NotConnected));
            }
            return;
        }
        for ctx in batch {
            let command = &ctx.command;
            if command.kind() == CommandKind::DisableNotify {
                self.router
                    .suspend(command.collection(), command.item(), command.instance());
            }
            trace!(%command, ahead = self.queue.pending_len(), "command queued");
            self.queue.push(ctx);
        }
        self.drain();
    }

    /// Issue queued commands until one is in flight or the queue is empty.
    fn drain(&mut self) {
        while self.state() == ConnectionState::Connected && !self.queue.is_busy() {
            let Some(ctx) = self.queue.pop_input() else {
                break;
            };

            let delay = ctx.command.delay();
            if !delay.is_zero() {
                trace!(command = %ctx.command, ?delay, "command delayed");
                if ctx.command.kind().is_routing() {
                    self.queue.defer(ctx);
                } else {
                    self.queue.begin(ctx);
                }
                self.timers.arm(TimerKind::Delay, delay);
                break;
            }
            self.dispatch(ctx);
        }
    }

    fn dispatch(&mut self, ctx: CommandContext) {
        match ctx.command.kind() {
            CommandKind::EnableNotify => self.enable_notify(ctx),
            CommandKind::DisableNotify => self.disable_notify(ctx),
            _ => {
                self.queue.begin(ctx);
                self.issue_in_flight();
            }
        }
    }

    /// Issue the output-queue head to the transport and arm its timeout.
    fn issue_in_flight(&mut self) {
        let Some(ctx) = self.queue.in_flight_mut() else {
            return;
        };
        let result = issue(&mut self.link, self.attributes.as_deref(), &ctx.command);
        match result {
            Ok(issued_to) => {
                ctx.issued_to = issued_to;
                trace!(command = %ctx.command, attempt = ctx.attempts, "command issued");
                if !self.config.command_timeout.is_zero() {
                    self.timers
                        .arm(TimerKind::Command, self.config.command_timeout);
                }
            }
            Err(e) => {
                debug!(command = %ctx.command, error = %e, "command rejected before send");
                if let Some(ctx) = self.queue.finish() {
                    self.fail(ctx, e);
                }
            }
        }
    }

    fn complete(
        &mut self,
        completion: Completion,
        answered: Option<IssuedTarget>,
        status: Status,
        output: CommandOutput,
    ) {
        if self.state() != ConnectionState::Connected {
            trace!(?completion, "completion outside connected ignored");
            return;
        }
        if self.timers.is_armed(TimerKind::Delay) {
            warn!(?completion, "completion while head command is still delayed, dropped");
            return;
        }
        let Some(head) = self.queue.in_flight() else {
            debug!(?completion, "completion with nothing in flight");
            return;
        };
        // A late answer to a timed-out command shares its kind with the
        // next one but not its attribute.
        if !completion.answers(head.command.kind()) || head.issued_to != answered {
            warn!(
                ?completion,
                ?answered,
                in_flight = %head.command,
                "stale completion dropped"
            );
            return;
        }

        self.timers.cancel(TimerKind::Command);
        let Some(ctx) = self.queue.finish() else {
            return;
        };
        if status.is_success() {
            trace!(command = %ctx.command, "command completed");
            ctx.resolve(Ok(output));
        } else {
            debug!(command = %ctx.command, %status, "command failed");
            let error = CoreError::OperationFailed {
                operation: ctx.command.kind(),
                status: status.0,
            };
            self.fail(ctx, error);
        }
        self.drain();
    }

    fn on_command_timeout(&mut self) {
        if self.state() != ConnectionState::Connected {
            return;
        }
        let Some(ctx) = self.queue.in_flight_mut() else {
            return;
        };
        ctx.attempts += 1;
        let attempt = ctx.attempts;

        if ctx.command.should_retry(attempt) {
            debug!(command = %ctx.command, attempt, "command timed out, retrying");
            self.issue_in_flight();
        } else if let Some(ctx) = self.queue.finish() {
            warn!(command = %ctx.command, attempt, "command timed out");
            let error = CoreError::Timeout {
                operation: ctx.command.kind(),
                after_ms: millis(self.config.command_timeout),
            };
            self.fail(ctx, error);
        }
        self.drain();
    }

    /// Resolve a failed command, abandoning whatever is still queued from
    /// its linked batch with the same error.
    fn fail(&mut self, ctx: CommandContext, error: CoreError) {
        let batch = ctx.batch;
        ctx.resolve(Err(error.clone()));
        let Some(batch) = batch else {
            return;
        };
        let abandoned = self.queue.take_batch(batch);
        if !abandoned.is_empty() {
            debug!(batch, abandoned = abandoned.len(), "linked batch abandoned");
        }
        for ctx in abandoned {
            ctx.resolve(Err(error.clone()));
        }
    }

    fn on_delay_elapsed(&mut self) {
        if self.state() != ConnectionState::Connected {
            return;
        }
        match self.queue.take_deferred() {
            Some(ctx) => self.dispatch(ctx),
            None => self.issue_in_flight(),
        }
        self.drain();
    }

    // ── Notifications ────────────────────────────────────────────

    fn enable_notify(&mut self, mut ctx: CommandContext) {
        let Some(subscriber) = ctx.subscriber.take() else {
            ctx.resolve(Err(CoreError::InvalidCommand {
                reason: "enable-notify needs a notification stream".into(),
            }));
            return;
        };
        let collection = ctx.command.collection();
        let item = ctx.command.item();

        let target = self.attributes.as_deref().map_or(
            Err(CoreError::CollectionNotFound { collection }),
            |table| {
                table
                    .resolve(&collection, &item, ctx.command.instance(), |i| {
                        i.notify_mode().is_some()
                    })
                    .map(|found| {
                        (
                            found.key(collection),
                            found.notify_mode(),
                            found.has_sub_item(&CLIENT_CONFIG_UUID),
                        )
                    })
            },
        );
        let (key, mode, has_client_config) = match target {
            Ok(found) => found,
            Err(e) => {
                ctx.resolve(Err(e));
                return;
            }
        };
        let Some(mode) = mode else {
            let error = CoreError::Unsupported {
                operation: format!("change notifications on {key}"),
            };
            ctx.resolve(Err(error));
            return;
        };

        let accepted = match self.link.as_mut() {
            Some(link) => link
                .set_change_notification(&key, true)
                .map_err(CoreError::from),
            None => Err(CoreError::NotConnected),
        };
        if let Err(e) = accepted {
            ctx.resolve(Err(e));
            return;
        }

        self.router.insert(key, ctx.command.clone(), subscriber);
        debug!(?key, subscriptions = self.router.len(), "subscription added");
        if self.config.write_client_config && has_client_config {
            let value = Bytes::copy_from_slice(&mode.client_config_value());
            let write =
                Command::write_descriptor(key.collection, key.item, CLIENT_CONFIG_UUID, value)
                    .with_instance(key.instance);
            self.queue
                .push_front(CommandContext::internal(write, "enable client configuration"));
        }
        ctx.resolve(Ok(CommandOutput::Done));
    }

    fn disable_notify(&mut self, ctx: CommandContext) {
        let command = &ctx.command;
        let removed = self
            .router
            .remove(command.collection(), command.item(), command.instance());
        let Some(key) = removed else {
            debug!(%command, "no active subscription, nothing to disable");
            ctx.resolve(Ok(CommandOutput::Done));
            return;
        };
        debug!(?key, subscriptions = self.router.len(), "subscription removed");

        let accepted = match self.link.as_mut() {
            Some(link) => link
                .set_change_notification(&key, false)
                .map_err(CoreError::from),
            None => Err(CoreError::NotConnected),
        };

        let has_client_config = self
            .attributes
            .as_deref()
            .and_then(|table| table.item(&key))
            .is_some_and(|item| item.has_sub_item(&CLIENT_CONFIG_UUID));
        if accepted.is_ok() && self.config.write_client_config && has_client_config {
            let write = Command::write_descriptor(
                key.collection,
                key.item,
                CLIENT_CONFIG_UUID,
                Bytes::from_static(&[0x00, 0x00]),
            )
            .with_instance(key.instance);
            self.queue
                .push_front(CommandContext::internal(write, "disable client configuration"));
        }
        ctx.resolve(accepted.map(|()| CommandOutput::Done));
    }

    // ── Timers ───────────────────────────────────────────────────

    fn on_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Connect => {
                if self.state() == ConnectionState::Connecting {
                    warn!(
                        timeout_ms = millis(self.config.connect_timeout),
                        "connect timed out"
                    );
                    self.go_idle(DisconnectReason::ConnectTimeout);
                }
            }
            TimerKind::Disconnect => {
                if self.state() == ConnectionState::Disconnecting {
                    warn!("disconnect not confirmed in time, forcing idle");
                    self.go_idle(DisconnectReason::DisconnectTimeout);
                }
            }
            TimerKind::Command => self.on_command_timeout(),
            TimerKind::Delay => self.on_delay_elapsed(),
            TimerKind::LinkQuality => self.poll_link_quality(),
        }
    }

    fn poll_link_quality(&mut self) {
        if self.state() != ConnectionState::Connected {
            return;
        }
        if let Some(link) = self.link.as_mut() {
            if let Err(e) = link.read_link_quality() {
                debug!(error = %e, "link quality poll rejected");
            }
        }
        if let Some(interval) = self.link_quality_interval {
            self.timers.arm(TimerKind::LinkQuality, interval);
        }
    }

    fn set_link_quality_monitor(&mut self, interval: Option<Duration>) {
        self.link_quality_interval = interval.map(normalize_interval);
        match self.link_quality_interval {
            Some(interval) if self.state() == ConnectionState::Connected => {
                debug!(?interval, "link quality monitor started");
                self.timers.arm(TimerKind::LinkQuality, interval);
            }
            Some(_) => {}
            None => self.timers.cancel(TimerKind::LinkQuality),
        }
    }

    // ── Maintenance ──────────────────────────────────────────────

    fn refresh_cache(&mut self, reply: ConnectReply) {
        if self.state() != ConnectionState::Connected {
            let _ = reply.send(Err(CoreError::NotConnected));
            return;
        }
        let Some(link) = self.link.as_mut() else {
            let _ = reply.send(Err(CoreError::NotConnected));
            return;
        };
        if !link.supports_cache_refresh() {
            let _ = reply.send(Err(CoreError::Unsupported {
                operation: "cache refresh".into(),
            }));
            return;
        }
        if let Err(e) = link.refresh_cache().and_then(|()| link.discover_collections()) {
            let _ = reply.send(Err(e.into()));
            return;
        }
        info!("attribute cache dropped, rediscovering");
        self.attributes = None;
        self.connect_waiters.push(reply);
    }
}

fn normalize_interval(interval: Duration) -> Duration {
    if interval.is_zero() {
        DEFAULT_LINK_QUALITY_INTERVAL
    } else {
        interval
    }
}

fn target(item: IdentityKey, sub_item: Option<Uuid>) -> IssuedTarget {
    IssuedTarget { item, sub_item }
}

/// Resolve a command's target and hand it to the link. Returns the
/// attribute the link was asked about, if any.
fn issue(
    link: &mut Option<Box<dyn Link>>,
    attributes: Option<&AttributeTable>,
    command: &Command,
) -> Result<Option<IssuedTarget>, CoreError> {
    let link = link.as_mut().ok_or(CoreError::NotConnected)?;
    if command.kind() == CommandKind::RequestMaxTransferSize {
        link.negotiate_max_transfer_size(command.max_transfer_size())?;
        return Ok(None);
    }

    let collection = command.collection();
    let item = command.item();
    let table = attributes.ok_or(CoreError::CollectionNotFound { collection })?;
    let resolve = |required: ItemProperties| {
        table
            .resolve(&collection, &item, command.instance(), |i| {
                i.properties.contains(required)
            })
            .map(|found| found.key(collection))
    };

    let issued = match command.kind() {
        CommandKind::Read => {
            let key = resolve(ItemProperties::READ)?;
            link.read_item(&key)?;
            target(key, None)
        }
        CommandKind::Write => {
            let key = resolve(ItemProperties::WRITE)?;
            link.write_item(&key, command.payload(), true)?;
            target(key, None)
        }
        CommandKind::WriteNoAck => {
            let key = resolve(ItemProperties::WRITE_NO_ACK)?;
            link.write_item(&key, command.payload(), false)?;
            target(key, None)
        }
        CommandKind::ReadDescriptor | CommandKind::WriteDescriptor => {
            let sub_item = command.sub_item().ok_or(CoreError::InvalidCommand {
                reason: format!("{} requires a sub-item", command.kind()),
            })?;
            let resolved = table.resolve(&collection, &item, command.instance(), |i| {
                i.has_sub_item(&sub_item)
            })?;
            if !resolved.has_sub_item(&sub_item) {
                return Err(CoreError::SubItemNotFound { item, sub_item });
            }
            let key = resolved.key(collection);
            if command.kind() == CommandKind::ReadDescriptor {
                link.read_sub_item(&key, &sub_item)?;
            } else {
                link.write_sub_item(&key, &sub_item, command.payload())?;
            }
            target(key, Some(sub_item))
        }
        CommandKind::EnableNotify
        | CommandKind::DisableNotify
        | CommandKind::RequestMaxTransferSize => {
            return Err(CoreError::Internal(format!(
                "{} cannot be issued from the output queue",
                command.kind()
            )));
        }
    };
    Ok(Some(issued))
}
