use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use super::Command;
use crate::connection::Subscriber;
use crate::error::CoreError;
use crate::model::IdentityKey;

/// Successful outcome of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutput {
    /// Bytes returned by a read.
    Value(Bytes),
    /// Transfer size granted by the peer.
    MaxTransferSize(u16),
    /// Write acknowledged or subscription toggled.
    Done,
}

impl CommandOutput {
    /// The read payload, or empty for outcomes that carry none.
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Value(bytes) => bytes,
            Self::MaxTransferSize(_) | Self::Done => Bytes::new(),
        }
    }
}

type ResponseTx = oneshot::Sender<Result<CommandOutput, CoreError>>;

/// Where a command's result goes.
pub(crate) enum Responder {
    Caller(ResponseTx),
    /// Queued by the connection itself; results are only logged.
    Internal(&'static str),
}

/// The resolved attribute an issued command went to. Completions are
/// matched against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IssuedTarget {
    pub item: IdentityKey,
    pub sub_item: Option<Uuid>,
}

/// A command paired with its responder.
///
/// `resolve` consumes the context, so each one is answered exactly once.
pub(crate) struct CommandContext {
    pub command: Command,
    pub responder: Responder,
    /// Timeouts seen so far.
    pub attempts: u32,
    /// Feeds the caller's notification stream, for `EnableNotify`.
    pub subscriber: Option<Subscriber>,
    /// Set each time the command is handed to the link.
    pub issued_to: Option<IssuedTarget>,
    /// Commands sharing a batch id are abandoned together when one fails.
    pub batch: Option<u64>,
}

impl CommandContext {
    pub fn new(command: Command) -> (Self, PendingCommand) {
        let (response_tx, rx) = oneshot::channel();
        let ctx = Self {
            command,
            responder: Responder::Caller(response_tx),
            attempts: 0,
            subscriber: None,
            issued_to: None,
            batch: None,
        };
        (ctx, PendingCommand { rx })
    }

    pub fn internal(command: Command, label: &'static str) -> Self {
        Self {
            command,
            responder: Responder::Internal(label),
            attempts: 0,
            subscriber: None,
            issued_to: None,
            batch: None,
        }
    }

    #[must_use]
    pub fn with_subscriber(mut self, subscriber: Subscriber) -> Self {
        self.subscriber = Some(subscriber);
        self
    }

    pub fn resolve(self, result: Result<CommandOutput, CoreError>) {
        match self.responder {
            Responder::Caller(tx) => {
                // Caller may have dropped its PendingCommand; nothing to do then.
                let _ = tx.send(result);
            }
            Responder::Internal(label) => match result {
                Ok(_) => debug!(label, command = %self.command, "internal command completed"),
                // Expected during teardown
                Err(e) if e.is_lifecycle() => {
                    debug!(label, command = %self.command, error = %e, "internal command dropped");
                }
                Err(e) => warn!(label, command = %self.command, error = %e, "internal command failed"),
            },
        }
    }
}

/// Future resolving to the outcome of a submitted command.
///
/// Dropping it does not cancel the command.
#[derive(Debug)]
#[must_use = "a submitted command still runs, but its result is lost if this is dropped"]
pub struct PendingCommand {
    rx: oneshot::Receiver<Result<CommandOutput, CoreError>>,
}

impl Future for PendingCommand {
    type Output = Result<CommandOutput, CoreError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(CoreError::ConnectionLost)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::uuid_from_short;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    fn read() -> Command {
        Command::read(uuid_from_short(0x180f), uuid_from_short(0x2a19))
    }

    #[test]
    fn pending_until_resolved() {
        let (ctx, pending) = CommandContext::new(read());
        let mut pending = task::spawn(pending);
        assert_pending!(pending.poll());

        ctx.resolve(Ok(CommandOutput::Value(Bytes::from_static(&[1, 2]))));
        assert!(pending.is_woken());
        assert_ready_eq!(
            pending.poll(),
            Ok(CommandOutput::Value(Bytes::from_static(&[1, 2])))
        );
    }

    #[test]
    fn dropped_context_reads_as_connection_lost() {
        let (ctx, pending) = CommandContext::new(read());
        let mut pending = task::spawn(pending);
        drop(ctx);
        assert_ready_eq!(pending.poll(), Err(CoreError::ConnectionLost));
    }

    #[test]
    fn into_bytes_is_empty_for_done() {
        assert!(CommandOutput::Done.into_bytes().is_empty());
        assert_eq!(
            CommandOutput::Value(Bytes::from_static(b"ok")).into_bytes(),
            Bytes::from_static(b"ok")
        );
    }
}
