// ── Command API ──
//
// Every operation against the peer is described by a `Command`.
// The connection actor queues them, issues one at a time and resolves
// each through the responder carried in its `CommandContext`.

mod pending;
mod retry;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use strum::Display;
use uuid::Uuid;

use crate::config::{DEFAULT_MAX_TRANSFER_SIZE, MAX_TRANSFER_SIZE_LIMIT};
use crate::error::CoreError;
use crate::model::display_uuid;

pub use pending::{CommandOutput, PendingCommand};
pub(crate) use pending::{CommandContext, IssuedTarget};
pub use retry::{MaxRetries, RetryPolicy};

/// Opaque value echoed back with notifications routed for a subscription.
pub type CallerTag = u64;

/// Every operation the dispatcher knows how to issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum CommandKind {
    Read,
    Write,
    WriteNoAck,
    ReadDescriptor,
    WriteDescriptor,
    EnableNotify,
    DisableNotify,
    RequestMaxTransferSize,
}

impl CommandKind {
    /// Subscription toggles are resolved synchronously and never occupy
    /// the output queue.
    pub const fn is_routing(self) -> bool {
        matches!(self, Self::EnableNotify | Self::DisableNotify)
    }

    pub const fn carries_payload(self) -> bool {
        matches!(self, Self::Write | Self::WriteNoAck | Self::WriteDescriptor)
    }

    pub const fn targets_sub_item(self) -> bool {
        matches!(self, Self::ReadDescriptor | Self::WriteDescriptor)
    }
}

/// Description of one operation against the peer.
///
/// Built with the kind-specific constructors and adjusted through the
/// `with_*` builders before submission. Once submitted it is never mutated.
#[derive(Clone)]
pub struct Command {
    kind: CommandKind,
    collection: Uuid,
    item: Uuid,
    instance: Option<u16>,
    sub_item: Option<Uuid>,
    payload: Bytes,
    delay: Duration,
    max_transfer_size: u16,
    tag: Option<CallerTag>,
    retry: Option<Arc<dyn RetryPolicy>>,
}

impl Command {
    fn base(kind: CommandKind, collection: Uuid, item: Uuid) -> Self {
        Self {
            kind,
            collection,
            item,
            instance: None,
            sub_item: None,
            payload: Bytes::new(),
            delay: Duration::ZERO,
            max_transfer_size: 0,
            tag: None,
            retry: None,
        }
    }

    // ── Constructors ─────────────────────────────────────────────────

    pub fn read(collection: Uuid, item: Uuid) -> Self {
        Self::base(CommandKind::Read, collection, item)
    }

    pub fn write(collection: Uuid, item: Uuid, payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::base(CommandKind::Write, collection, item)
        }
    }

    pub fn write_no_ack(collection: Uuid, item: Uuid, payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::base(CommandKind::WriteNoAck, collection, item)
        }
    }

    pub fn read_descriptor(collection: Uuid, item: Uuid, sub_item: Uuid) -> Self {
        Self {
            sub_item: Some(sub_item),
            ..Self::base(CommandKind::ReadDescriptor, collection, item)
        }
    }

    pub fn write_descriptor(
        collection: Uuid,
        item: Uuid,
        sub_item: Uuid,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            sub_item: Some(sub_item),
            payload: payload.into(),
            ..Self::base(CommandKind::WriteDescriptor, collection, item)
        }
    }

    pub fn enable_notify(collection: Uuid, item: Uuid) -> Self {
        Self::base(CommandKind::EnableNotify, collection, item)
    }

    pub fn disable_notify(collection: Uuid, item: Uuid) -> Self {
        Self::base(CommandKind::DisableNotify, collection, item)
    }

    pub fn request_max_transfer_size(size: u16) -> Self {
        Self {
            max_transfer_size: size,
            ..Self::base(CommandKind::RequestMaxTransferSize, Uuid::nil(), Uuid::nil())
        }
    }

    // ── Builders ─────────────────────────────────────────────────────

    /// Wait this long before issuing. The wait still blocks the queue.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: CallerTag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Pin the command to one instance of a repeated item UUID.
    #[must_use]
    pub fn with_instance(mut self, instance: u16) -> Self {
        self.instance = Some(instance);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry = Some(Arc::new(policy));
        self
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn collection(&self) -> Uuid {
        self.collection
    }

    pub fn item(&self) -> Uuid {
        self.item
    }

    pub fn instance(&self) -> Option<u16> {
        self.instance
    }

    pub fn sub_item(&self) -> Option<Uuid> {
        self.sub_item
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn max_transfer_size(&self) -> u16 {
        self.max_transfer_size
    }

    pub fn tag(&self) -> Option<CallerTag> {
        self.tag
    }

    /// Ask the retry policy whether the `attempt`-th timeout should re-issue.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.retry
            .as_ref()
            .is_some_and(|policy| policy.should_retry(self, attempt))
    }

    /// Reject commands that could never be issued.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.kind.targets_sub_item() && self.sub_item.is_none() {
            return Err(CoreError::InvalidCommand {
                reason: format!("{} requires a sub-item", self.kind),
            });
        }
        if self.kind == CommandKind::RequestMaxTransferSize
            && !(DEFAULT_MAX_TRANSFER_SIZE..=MAX_TRANSFER_SIZE_LIMIT)
                .contains(&self.max_transfer_size)
        {
            return Err(CoreError::InvalidCommand {
                reason: format!(
                    "transfer size {} outside {DEFAULT_MAX_TRANSFER_SIZE}..={MAX_TRANSFER_SIZE_LIMIT}",
                    self.max_transfer_size
                ),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("kind", &self.kind)
            .field("collection", &display_uuid(&self.collection))
            .field("item", &display_uuid(&self.item))
            .field("instance", &self.instance)
            .field("sub_item", &self.sub_item.as_ref().map(display_uuid))
            .field("payload_len", &self.payload.len())
            .field("delay", &self.delay)
            .field("tag", &self.tag)
            .field("retry", &self.retry.is_some())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CommandKind::RequestMaxTransferSize => {
                write!(f, "{} {}", self.kind, self.max_transfer_size)
            }
            _ => write!(
                f,
                "{} {}/{}",
                self.kind,
                display_uuid(&self.collection),
                display_uuid(&self.item)
            ),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::uuid_from_short;

    #[test]
    fn kind_display_is_kebab_case() {
        assert_eq!(CommandKind::WriteNoAck.to_string(), "write-no-ack");
        assert_eq!(
            CommandKind::RequestMaxTransferSize.to_string(),
            "request-max-transfer-size"
        );
    }

    #[test]
    fn builders_set_fields() {
        let cmd = Command::write(uuid_from_short(0x180f), uuid_from_short(0x2a19), vec![0xff])
            .with_delay(Duration::from_millis(20))
            .with_tag(7)
            .with_instance(2);
        assert_eq!(cmd.kind(), CommandKind::Write);
        assert_eq!(cmd.payload().as_ref(), &[0xff]);
        assert_eq!(cmd.delay(), Duration::from_millis(20));
        assert_eq!(cmd.tag(), Some(7));
        assert_eq!(cmd.instance(), Some(2));
        assert_eq!(cmd.to_string(), "write 180f/2a19");
    }

    #[test]
    fn routing_kinds() {
        assert!(CommandKind::EnableNotify.is_routing());
        assert!(CommandKind::DisableNotify.is_routing());
        assert!(!CommandKind::Read.is_routing());
    }

    #[test]
    fn transfer_size_is_validated() {
        assert!(Command::request_max_transfer_size(517).validate().is_ok());
        assert!(Command::request_max_transfer_size(10).validate().is_err());
        assert!(Command::request_max_transfer_size(600).validate().is_err());
    }

    #[test]
    fn no_policy_never_retries() {
        let cmd = Command::read(uuid_from_short(0x180f), uuid_from_short(0x2a19));
        assert!(!cmd.should_retry(1));

        let cmd = cmd.with_retry(MaxRetries(1));
        assert!(cmd.should_retry(1));
        assert!(!cmd.should_retry(2));
    }
}
