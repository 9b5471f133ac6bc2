// gattline-core: serialized command queue and connection state machine
// for a GATT-style attribute client. Transports plug in underneath via
// the `transport` traits; the CLI and other consumers sit on top.

pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod model;
pub mod transport;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{CallerTag, Command, CommandKind, CommandOutput, MaxRetries, PendingCommand, RetryPolicy};
pub use config::ConnectionConfig;
pub use connection::{
    Connection, ConnectionState, DisconnectReason, LifecycleEvent, Notification,
    NotificationStream,
};
pub use error::CoreError;
pub use transport::{Adapter, EventSink, Link, LinkState, Status, TransportError, TransportEvent};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    AttributeTable, Collection, IdentityKey, Item, ItemProperties, PeerAddress, SubItem,
};
