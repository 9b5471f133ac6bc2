// ── Core error types ──
//
// User-facing errors from gattline-core. Consumers never see raw
// transport rejections directly -- the `From<TransportError>` impl
// translates them into domain-appropriate variants.

use thiserror::Error;
use uuid::Uuid;

use crate::command::CommandKind;
use crate::model::display_uuid;
use crate::transport::TransportError;

/// Unified error type for the core crate.
///
/// Cloneable so one lifecycle failure can be fanned out to every waiter
/// it terminates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Not connected to a peer")]
    NotConnected,

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Connection attempt timed out after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    #[error("Transport unavailable: {reason}")]
    TransportUnavailable { reason: String },

    #[error("Attribute discovery failed (status 0x{status:02x})")]
    DiscoveryFailed { status: u8 },

    // ── Attribute errors ─────────────────────────────────────────────
    #[error("Collection not offered by the peer: {}", display_uuid(.collection))]
    CollectionNotFound { collection: Uuid },

    #[error("Item {} not found in collection {}", display_uuid(.item), display_uuid(.collection))]
    ItemNotFound { collection: Uuid, item: Uuid },

    #[error("Sub-item {} not found on item {}", display_uuid(.sub_item), display_uuid(.item))]
    SubItemNotFound { item: Uuid, sub_item: Uuid },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("{operation} rejected by transport: {reason}")]
    Rejected { operation: String, reason: String },

    #[error("{operation} failed (status 0x{status:02x})")]
    OperationFailed { operation: CommandKind, status: u8 },

    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: CommandKind, after_ms: u64 },

    #[error("Operation not supported: {operation}")]
    Unsupported { operation: String },

    #[error("Invalid command: {reason}")]
    InvalidCommand { reason: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether this error was produced by the lifecycle tearing the
    /// connection down (as opposed to a single operation failing).
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::ConnectionLost
                | Self::ConnectTimeout { .. }
                | Self::TransportUnavailable { .. }
                | Self::DiscoveryFailed { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<TransportError> for CoreError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unavailable(reason) => CoreError::TransportUnavailable { reason },
            TransportError::Rejected { operation, reason } => CoreError::Rejected {
                operation: operation.to_string(),
                reason,
            },
            TransportError::Unsupported(operation) => CoreError::Unsupported {
                operation: operation.to_string(),
            },
            TransportError::NotReady => CoreError::NotConnected,
        }
    }
}
