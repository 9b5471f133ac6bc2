// ── Runtime connection configuration ──
//
// These types describe *how* a connection behaves: lifecycle timeouts,
// per-command timeout, transfer-size negotiation and link-quality polling.
// They never touch disk. The CLI builds a `ConnectionConfig` from a
// profile and hands it in.

use std::time::Duration;

/// Default transfer unit size before any negotiation.
pub const DEFAULT_MAX_TRANSFER_SIZE: u16 = 23;

/// Largest transfer unit size a peer may grant.
pub const MAX_TRANSFER_SIZE_LIMIT: u16 = 517;

/// Poll interval used when link-quality monitoring is enabled with a zero interval.
pub const DEFAULT_LINK_QUALITY_INTERVAL: Duration = Duration::from_millis(2000);

/// Configuration for a single logical connection.
///
/// Built by the CLI, passed to `Connection::new` -- core never reads config files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// How long `Connecting` may last before the attempt is abandoned.
    pub connect_timeout: Duration,
    /// How long `Disconnecting` waits for the transport to confirm.
    pub disconnect_timeout: Duration,
    /// Per-command timeout. `Duration::ZERO` disables it.
    pub command_timeout: Duration,
    /// Transfer size requested after discovery. 0 skips negotiation.
    pub max_transfer_size: u16,
    /// Poll link quality while connected. `None` = never.
    pub link_quality_interval: Option<Duration>,
    /// Write the client configuration sub-item after enabling notifications.
    pub write_client_config: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            disconnect_timeout: Duration::from_millis(1500),
            command_timeout: Duration::from_secs(10),
            max_transfer_size: MAX_TRANSFER_SIZE_LIMIT,
            link_quality_interval: None,
            write_client_config: true,
        }
    }
}

impl ConnectionConfig {
    /// Whether a transfer-size request should follow discovery.
    pub(crate) fn negotiates_transfer_size(&self) -> bool {
        self.max_transfer_size > DEFAULT_MAX_TRANSFER_SIZE
    }
}
