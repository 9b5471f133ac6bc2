//! CLI error types with miette diagnostics.
//!
//! Maps core, transport and config failures into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use gattline_btle::BtleError;
use gattline_config::ConfigError;
use gattline_core::CoreError;
use gattline_core::model::display_uuid;

/// Process exit codes, stable across releases.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const UNSUPPORTED: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to {peer}: {reason}")]
    #[diagnostic(
        code(gattline::connection_failed),
        help(
            "Check that the peer is powered, in range and not connected elsewhere.\n\
             Try: gattline scan --name <fragment>"
        )
    )]
    ConnectionFailed { peer: String, reason: String },

    #[error("Connection lost")]
    #[diagnostic(
        code(gattline::connection_lost),
        help("The peer dropped the link. Move closer or retry.")
    )]
    ConnectionLost,

    #[error("Bluetooth unavailable: {reason}")]
    #[diagnostic(
        code(gattline::bluetooth),
        help("Check that a Bluetooth adapter is present and powered on, or pick one with --adapter.")
    )]
    Bluetooth { reason: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(gattline::not_found),
        help("Run: gattline {list_command} to see what is available")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── Operations ───────────────────────────────────────────────────
    #[error("{operation} failed: {message}")]
    #[diagnostic(code(gattline::operation_failed))]
    OperationFailed { operation: String, message: String },

    #[error("Operation '{operation}' is not supported")]
    #[diagnostic(
        code(gattline::unsupported),
        help("The peer or the Bluetooth stack on this host cannot do this.")
    )]
    Unsupported { operation: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(gattline::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("No peer specified")]
    #[diagnostic(
        code(gattline::no_peer),
        help(
            "Pass --peer <address|name>, set GATTLINE_PEER, or add `peer` to a profile.\n\
             Create a profile with: gattline config init --peer <address>"
        )
    )]
    NoPeer,

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(gattline::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: gattline config init --name {name}"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(code(gattline::config_exists), help("Use --force to replace it."))]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(gattline::config))]
    Config(Box<figment::Error>),

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("{operation} timed out after {millis}ms")]
    #[diagnostic(
        code(gattline::timeout),
        help("Increase the timeout with --timeout or in the profile, or move closer to the peer.")
    )]
    Timeout { operation: String, millis: u64 },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to serialize output: {0}")]
    #[diagnostic(code(gattline::serialize))]
    Serialize(String),
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::ConnectionLost | Self::Bluetooth { .. } => {
                exit_code::CONNECTION
            }
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::NoPeer | Self::ConfigExists { .. } => exit_code::USAGE,
            Self::Unsupported { .. } => exit_code::UNSUPPORTED,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotConnected | CoreError::ConnectionLost => Self::ConnectionLost,

            CoreError::ConnectTimeout { timeout_ms } => Self::Timeout {
                operation: "connect".into(),
                millis: timeout_ms,
            },

            CoreError::TransportUnavailable { reason } => Self::Bluetooth { reason },

            CoreError::DiscoveryFailed { .. } => Self::OperationFailed {
                operation: "discovery".into(),
                message: err.to_string(),
            },

            CoreError::CollectionNotFound { collection } => Self::NotFound {
                resource_type: "collection".into(),
                identifier: display_uuid(&collection),
                list_command: "services".into(),
            },

            CoreError::ItemNotFound { collection, item } => Self::NotFound {
                resource_type: "item".into(),
                identifier: format!("{}/{}", display_uuid(&collection), display_uuid(&item)),
                list_command: "services".into(),
            },

            CoreError::SubItemNotFound { item, sub_item } => Self::NotFound {
                resource_type: "sub-item".into(),
                identifier: format!("{}/{}", display_uuid(&item), display_uuid(&sub_item)),
                list_command: "services".into(),
            },

            CoreError::Timeout {
                operation,
                after_ms,
            } => Self::Timeout {
                operation: operation.to_string(),
                millis: after_ms,
            },

            CoreError::OperationFailed { operation, .. } => Self::OperationFailed {
                operation: operation.to_string(),
                message: err.to_string(),
            },

            CoreError::Rejected { operation, reason } => Self::OperationFailed {
                operation,
                message: reason,
            },

            CoreError::Unsupported { operation } => Self::Unsupported { operation },

            CoreError::InvalidCommand { reason } => Self::Validation {
                field: "command".into(),
                reason,
            },

            CoreError::Internal(message) => Self::OperationFailed {
                operation: "internal".into(),
                message,
            },
        }
    }
}

impl From<BtleError> for CliError {
    fn from(err: BtleError) -> Self {
        match err {
            BtleError::PeripheralNotFound(peer) => Self::NotFound {
                resource_type: "peer".into(),
                identifier: peer.to_string(),
                list_command: "scan".into(),
            },
            BtleError::NoMatch(pattern) => Self::NotFound {
                resource_type: "peer".into(),
                identifier: pattern,
                list_command: "scan".into(),
            },
            BtleError::AdapterIndex { .. } | BtleError::NoAdapter | BtleError::Btleplug(_) => {
                Self::Bluetooth {
                    reason: err.to_string(),
                }
            }
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ProfileNotFound { name, available } => {
                Self::ProfileNotFound { name, available }
            }
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::Figment(inner) => Self::Config(inner),
            ConfigError::Io(e) => Self::Io(e),
            ConfigError::Serialization(e) => Self::Serialize(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gattline_core::CommandKind;
    use gattline_core::model::uuid_from_short;

    #[test]
    fn core_errors_map_to_exit_codes() {
        let timeout: CliError = CoreError::Timeout {
            operation: CommandKind::Read,
            after_ms: 10_000,
        }
        .into();
        assert_eq!(timeout.exit_code(), exit_code::TIMEOUT);
        assert_eq!(timeout.to_string(), "read timed out after 10000ms");

        let missing: CliError = CoreError::ItemNotFound {
            collection: uuid_from_short(0x180d),
            item: uuid_from_short(0x2a37),
        }
        .into();
        assert_eq!(missing.exit_code(), exit_code::NOT_FOUND);
        assert_eq!(missing.to_string(), "item '180d/2a37' not found");

        let lost: CliError = CoreError::ConnectionLost.into();
        assert_eq!(lost.exit_code(), exit_code::CONNECTION);

        let unsupported: CliError = CoreError::Unsupported {
            operation: "cache refresh".into(),
        }
        .into();
        assert_eq!(unsupported.exit_code(), exit_code::UNSUPPORTED);
    }

    #[test]
    fn config_errors_keep_their_meaning() {
        let err: CliError = ConfigError::ProfileNotFound {
            name: "lab".into(),
            available: "(none)".into(),
        }
        .into();
        assert_eq!(err.exit_code(), exit_code::NOT_FOUND);
        assert_eq!(CliError::NoPeer.exit_code(), exit_code::USAGE);
    }
}
