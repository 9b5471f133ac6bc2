//! Connection setup shared by every peer-bound command, plus argument
//! helpers for UUIDs and payloads.

use gattline_btle::BtleAdapter;
use gattline_core::model::{parse_hex, parse_uuid};
use gattline_core::{Command as CoreCommand, Connection, CoreError, LifecycleEvent, PeerAddress};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cli::{GlobalOpts, ItemRef};
use crate::config::{Context, PeerTarget};
use crate::error::CliError;
use crate::output;

/// A connected, discovered peer.
pub struct Session {
    pub connection: Connection,
    pub peer: PeerAddress,
}

impl Session {
    /// Resolve the peer, connect and wait for discovery.
    pub async fn open(global: &GlobalOpts, ctx: &Context) -> Result<Self, CliError> {
        let target = ctx.peer_target(global)?;
        let config = ctx.connection_config(global)?;
        let index = ctx.adapter_index(global);

        let adapter = BtleAdapter::new(index)
            .await?
            .with_scan_window(ctx.config.defaults.scan_duration.max(config.connect_timeout));

        let peer = match target {
            PeerTarget::Address(addr) => addr,
            PeerTarget::Pattern(pattern) => {
                status(ctx, &format!("Scanning for '{pattern}'..."));
                let found = gattline_btle::find_peer(
                    adapter.central(),
                    &pattern,
                    ctx.config.defaults.scan_duration,
                )
                .await?;
                info!(%pattern, peer = %found.address, "resolved peer");
                found.address
            }
        };

        let connection = Connection::new(config, adapter);
        spawn_event_log(&connection);

        status(ctx, &format!("Connecting to {peer}..."));
        connection.connect(peer).await.map_err(|e| match e {
            CoreError::ConnectTimeout { .. } => e.into(),
            other => CliError::ConnectionFailed {
                peer: peer.to_string(),
                reason: other.to_string(),
            },
        })?;
        debug!(%peer, items = connection.attributes().len(), "session ready");

        Ok(Self { connection, peer })
    }

    pub async fn close(self) {
        self.connection.disconnect().await;
        self.connection.shutdown();
    }
}

fn spawn_event_log(connection: &Connection) {
    let mut events = connection.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                LifecycleEvent::Disconnected { peer, reason } => {
                    debug!(?peer, %reason, status = reason.status_code(), "disconnected");
                }
                other => debug!(?other, "lifecycle"),
            }
        }
    });
}

/// Progress line on stderr, suppressed by --quiet.
pub fn status(ctx: &Context, message: &str) {
    if !ctx.quiet {
        eprintln!("{}", output::dim(message, ctx.color));
    }
}

// ── Argument helpers ─────────────────────────────────────────────────

pub fn uuid_arg(field: &str, raw: &str) -> Result<Uuid, CliError> {
    parse_uuid(raw).map_err(|e| CliError::Validation {
        field: field.into(),
        reason: format!("'{raw}' is not a UUID: {e}"),
    })
}

/// Parsed collection and item UUIDs from positional arguments.
pub struct Target {
    pub collection: Uuid,
    pub item: Uuid,
    pub instance: Option<u16>,
}

impl Target {
    pub fn parse(item: &ItemRef) -> Result<Self, CliError> {
        Ok(Self {
            collection: uuid_arg("collection", &item.collection)?,
            item: uuid_arg("item", &item.item)?,
            instance: item.instance,
        })
    }

    /// Apply the instance pin, if any.
    pub fn pin(&self, command: CoreCommand) -> CoreCommand {
        match self.instance {
            Some(instance) => command.with_instance(instance),
            None => command,
        }
    }
}

pub fn payload_arg(raw: &str, text: bool) -> Result<Vec<u8>, CliError> {
    if text {
        return Ok(raw.as_bytes().to_vec());
    }
    parse_hex(raw).map_err(|e| CliError::Validation {
        field: "value".into(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use gattline_core::model::uuid_from_short;

    use super::*;

    #[test]
    fn payload_accepts_separators_and_text() {
        assert_eq!(payload_arg("0x01:02-03 04", false).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(payload_arg("hi", true).unwrap(), b"hi".to_vec());
        assert!(matches!(
            payload_arg("abc", false),
            Err(CliError::Validation { .. })
        ));
    }

    #[test]
    fn target_parses_short_uuids() {
        let target = Target::parse(&ItemRef {
            collection: "180d".into(),
            item: "0x2A37".into(),
            instance: Some(1),
        })
        .unwrap();
        assert_eq!(target.collection, uuid_from_short(0x180d));
        assert_eq!(target.item, uuid_from_short(0x2a37));

        let pinned = target.pin(CoreCommand::read(target.collection, target.item));
        assert_eq!(pinned.instance(), Some(1));
    }

    #[test]
    fn bad_uuid_names_the_field() {
        let err = uuid_arg("item", "not-a-uuid").unwrap_err();
        assert!(err.to_string().contains("item"));
    }
}
