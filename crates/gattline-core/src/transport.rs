// ── Transport boundary ──
//
// The core never touches hardware. An `Adapter` opens a `Link` to one
// peer; the link accepts or rejects each request synchronously and
// reports outcomes later through the `EventSink` it was handed.

use std::fmt;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::connection::Input;
use crate::model::{Collection, IdentityKey, PeerAddress};

// ── Errors ───────────────────────────────────────────────────────────

/// Synchronous rejection of a transport request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("{operation} rejected: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },

    #[error("{0} not supported by this transport")]
    Unsupported(&'static str),

    #[error("link not ready")]
    NotReady,
}

// ── Status codes ─────────────────────────────────────────────────────

/// Status byte reported with asynchronous outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub u8);

impl Status {
    pub const SUCCESS: Self = Self(0x00);
    /// Generic failure used when the transport has no finer code.
    pub const FAILURE: Self = Self(0x85);

    pub const fn is_success(self) -> bool {
        self.0 == Self::SUCCESS.0
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

// ── Events ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Asynchronous outcome reported by a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Lifecycle {
        state: LinkState,
        status: Status,
    },
    CollectionsDiscovered(Result<Vec<Collection>, Status>),
    ItemRead {
        item: IdentityKey,
        status: Status,
        payload: Bytes,
    },
    ItemWritten {
        item: IdentityKey,
        status: Status,
    },
    SubItemRead {
        item: IdentityKey,
        sub_item: Uuid,
        status: Status,
        payload: Bytes,
    },
    SubItemWritten {
        item: IdentityKey,
        sub_item: Uuid,
        status: Status,
    },
    /// Unsolicited notification or indication.
    ChangeEvent {
        item: IdentityKey,
        payload: Bytes,
    },
    MaxTransferSizeChanged {
        size: u16,
        status: Status,
    },
    LinkQualityRead {
        rssi: i16,
        status: Status,
    },
}

/// Handle a link uses to report events back to its connection.
///
/// Events are tagged with the link's generation; once the connection has
/// released the link, anything it still sends is discarded.
#[derive(Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<Input>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { generation, tx }
    }

    /// Deliver an event. Returns `false` once the connection is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Input::Transport {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

// ── Traits ───────────────────────────────────────────────────────────

pub type TransportResult = Result<(), TransportError>;

/// Factory for links. Owned by the connection actor.
pub trait Adapter: Send + 'static {
    /// Start connecting to `target`. `Ok` means the attempt is under way and
    /// its outcome will arrive as a `Lifecycle` event on `events`.
    fn open(&mut self, target: &PeerAddress, events: EventSink)
    -> Result<Box<dyn Link>, TransportError>;
}

/// One connection attempt to one peer.
///
/// Every method returns immediately. `Ok` only means the request was
/// accepted; its outcome arrives later as a `TransportEvent`.
pub trait Link: Send + 'static {
    fn disconnect(&mut self) -> TransportResult;

    /// Release all resources. No further events are expected afterwards.
    fn close(&mut self);

    fn discover_collections(&mut self) -> TransportResult;

    fn read_item(&mut self, item: &IdentityKey) -> TransportResult;

    fn write_item(&mut self, item: &IdentityKey, payload: &Bytes, ack: bool) -> TransportResult;

    fn read_sub_item(&mut self, item: &IdentityKey, sub_item: &Uuid) -> TransportResult;

    fn write_sub_item(
        &mut self,
        item: &IdentityKey,
        sub_item: &Uuid,
        payload: &Bytes,
    ) -> TransportResult;

    /// Toggle local delivery of change events for `item`. Synchronous: no
    /// completion event follows.
    fn set_change_notification(&mut self, item: &IdentityKey, enabled: bool) -> TransportResult;

    fn negotiate_max_transfer_size(&mut self, size: u16) -> TransportResult;

    fn read_link_quality(&mut self) -> TransportResult;

    fn supports_cache_refresh(&self) -> bool {
        false
    }

    /// Drop any cached attribute table so the next discovery hits the peer.
    fn refresh_cache(&mut self) -> TransportResult {
        Err(TransportError::Unsupported("cache refresh"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_and_success() {
        assert!(Status::SUCCESS.is_success());
        assert!(!Status(0x85).is_success());
        assert_eq!(Status(0x0a).to_string(), "0x0a");
    }

    #[tokio::test]
    async fn sink_reports_closed_connection() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(3, tx);
        assert!(sink.emit(TransportEvent::LinkQualityRead {
            rssi: -40,
            status: Status::SUCCESS,
        }));
        drop(rx);
        assert!(!sink.emit(TransportEvent::Lifecycle {
            state: LinkState::Disconnected,
            status: Status::SUCCESS,
        }));
    }
}
