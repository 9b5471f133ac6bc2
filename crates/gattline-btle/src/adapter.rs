// ── btleplug transport ──
//
// `BtleAdapter` opens links through a btleplug central. Every `Link` call
// resolves its target synchronously against the cached service table, then
// spawns the actual I/O and reports the outcome through the `EventSink`.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Descriptor, Peripheral as _, Service,
    WriteType,
};
use btleplug::platform::{Adapter as Controller, Peripheral};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use gattline_core::model::display_uuid;
use gattline_core::transport::TransportResult;
use gattline_core::{
    Adapter, Collection, ConnectionConfig, EventSink, IdentityKey, Item, ItemProperties, Link,
    LinkState, PeerAddress, Status, TransportError, TransportEvent,
};

use crate::error::BtleError;
use crate::scan;

/// How long `open` scans for a peer the central has not seen yet.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(10);

/// `Adapter` backed by one host Bluetooth controller.
///
/// btleplug subscribes asynchronously and has no completion event for it,
/// so `set_change_notification` is accepted as soon as the characteristic
/// resolves. If the peer then refuses the subscription the key stops being
/// forwarded and a warning is logged; the caller's stream stays open but
/// stays silent.
#[derive(Debug, Clone)]
pub struct BtleAdapter {
    central: Controller,
    scan_window: Duration,
}

impl BtleAdapter {
    /// Open the `index`-th controller on this host.
    pub async fn new(index: usize) -> Result<Self, BtleError> {
        Ok(Self::from_central(scan::central(index).await?))
    }

    pub fn from_central(central: Controller) -> Self {
        Self {
            central,
            scan_window: DEFAULT_SCAN_WINDOW,
        }
    }

    #[must_use]
    pub fn with_scan_window(mut self, window: Duration) -> Self {
        self.scan_window = window;
        self
    }

    pub fn central(&self) -> &Controller {
        &self.central
    }

    /// Fit a connection config to what btleplug can do.
    ///
    /// btleplug negotiates the transfer size on its own and writes the client
    /// configuration descriptor as part of `subscribe`, so the core must not
    /// do either.
    pub fn adjust_config(config: &mut ConnectionConfig) {
        config.max_transfer_size = 0;
        config.write_client_config = false;
    }
}

impl Adapter for BtleAdapter {
    fn open(
        &mut self,
        target: &PeerAddress,
        events: EventSink,
    ) -> Result<Box<dyn Link>, TransportError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        let shared = Arc::new(Shared {
            target: *target,
            peripheral: OnceLock::new(),
            subscribed: Mutex::new(Vec::new()),
            events,
            cancel: CancellationToken::new(),
        });
        runtime.spawn(establish(
            self.central.clone(),
            self.scan_window,
            Arc::clone(&shared),
        ));
        Ok(Box::new(BtleLink { shared, runtime }))
    }
}

// ── Link state shared with spawned tasks ─────────────────────────────

struct Shared {
    target: PeerAddress,
    peripheral: OnceLock<Peripheral>,
    /// Keys with notifications enabled; maps incoming values back to a key.
    subscribed: Mutex<Vec<IdentityKey>>,
    events: EventSink,
    cancel: CancellationToken,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        if !self.events.emit(event) {
            trace!(peer = %self.target, "connection gone, event dropped");
        }
    }

    fn link_down(&self, status: Status) {
        self.emit(TransportEvent::Lifecycle {
            state: LinkState::Disconnected,
            status,
        });
    }

    fn subscribed(&self) -> std::sync::MutexGuard<'_, Vec<IdentityKey>> {
        self.subscribed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// First subscribed key for a characteristic UUID. btleplug reports
    /// values by UUID only, so repeated UUIDs resolve to the earliest key.
    fn key_for(&self, uuid: &Uuid) -> Option<IdentityKey> {
        self.subscribed().iter().find(|k| k.item == *uuid).copied()
    }
}

async fn establish(central: Controller, window: Duration, shared: Arc<Shared>) {
    let attempt = async {
        let peripheral = scan::locate(&central, shared.target, window).await?;
        peripheral.connect().await?;
        Ok::<_, BtleError>(peripheral)
    };
    let result = tokio::select! {
        () = shared.cancel.cancelled() => return,
        result = attempt => result,
    };

    let peripheral = match result {
        Ok(peripheral) => peripheral,
        Err(e) => {
            warn!(peer = %shared.target, error = %e, "connect failed");
            shared.link_down(Status::FAILURE);
            return;
        }
    };

    let _ = shared.peripheral.set(peripheral.clone());
    info!(peer = %shared.target, "link established");

    tokio::spawn(watch_disconnect(central, peripheral.clone(), Arc::clone(&shared)));
    tokio::spawn(pump_notifications(peripheral, Arc::clone(&shared)));
    shared.emit(TransportEvent::Lifecycle {
        state: LinkState::Connected,
        status: Status::SUCCESS,
    });
}

async fn watch_disconnect(central: Controller, peripheral: Peripheral, shared: Arc<Shared>) {
    let mut events = match central.events().await {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, "central event stream unavailable");
            return;
        }
    };
    let id = peripheral.id();
    loop {
        tokio::select! {
            () = shared.cancel.cancelled() => return,
            event = events.next() => match event {
                Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => {
                    debug!(peer = %shared.target, "adapter reported disconnect");
                    shared.link_down(Status::SUCCESS);
                    return;
                }
                Some(_) => {}
                None => return,
            },
        }
    }
}

async fn pump_notifications(peripheral: Peripheral, shared: Arc<Shared>) {
    let mut stream = match peripheral.notifications().await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "notification stream unavailable");
            return;
        }
    };
    loop {
        tokio::select! {
            () = shared.cancel.cancelled() => return,
            value = stream.next() => {
                let Some(value) = value else { return };
                match shared.key_for(&value.uuid) {
                    Some(item) => shared.emit(TransportEvent::ChangeEvent {
                        item,
                        payload: Bytes::from(value.value),
                    }),
                    None => trace!(uuid = %display_uuid(&value.uuid), "unsubscribed value dropped"),
                }
            }
        }
    }
}

// ── Attribute table conversion ───────────────────────────────────────

/// Characteristics of a service paired with their instance ordinal.
fn instances(service: &Service) -> impl Iterator<Item = (u16, &Characteristic)> {
    let mut seen: HashMap<Uuid, u16> = HashMap::new();
    service.characteristics.iter().map(move |c| {
        let slot = seen.entry(c.uuid).or_insert(0);
        let instance = *slot;
        *slot = slot.saturating_add(1);
        (instance, c)
    })
}

fn properties(flags: CharPropFlags) -> ItemProperties {
    ItemProperties::from_bits(flags.bits())
}

fn to_collections(services: &BTreeSet<Service>) -> Vec<Collection> {
    services
        .iter()
        .map(|service| {
            let items = instances(service)
                .map(|(instance, c)| {
                    c.descriptors.iter().fold(
                        Item::new(c.uuid, instance, properties(c.properties)),
                        |item, d| item.with_sub_item(d.uuid),
                    )
                })
                .collect();
            Collection {
                uuid: service.uuid,
                primary: service.primary,
                items,
            }
        })
        .collect()
}

// ── Link ─────────────────────────────────────────────────────────────

struct BtleLink {
    shared: Arc<Shared>,
    runtime: tokio::runtime::Handle,
}

impl BtleLink {
    fn peripheral(&self) -> Result<Peripheral, TransportError> {
        self.shared
            .peripheral
            .get()
            .cloned()
            .ok_or(TransportError::NotReady)
    }

    fn characteristic(
        &self,
        operation: &'static str,
        key: &IdentityKey,
    ) -> Result<(Peripheral, Characteristic), TransportError> {
        let peripheral = self.peripheral()?;
        let found = peripheral
            .services()
            .iter()
            .filter(|s| s.uuid == key.collection)
            .flat_map(instances)
            .find(|(instance, c)| c.uuid == key.item && *instance == key.instance)
            .map(|(_, c)| c.clone());
        match found {
            Some(c) => Ok((peripheral, c)),
            None => Err(TransportError::Rejected {
                operation,
                reason: format!("{key} not in service table"),
            }),
        }
    }

    fn descriptor(
        &self,
        operation: &'static str,
        key: &IdentityKey,
        sub_item: &Uuid,
    ) -> Result<(Peripheral, Descriptor), TransportError> {
        let (peripheral, c) = self.characteristic(operation, key)?;
        let found = c.descriptors.into_iter().find(|d| d.uuid == *sub_item);
        match found {
            Some(d) => Ok((peripheral, d)),
            None => Err(TransportError::Rejected {
                operation,
                reason: format!("{key} has no sub-item {}", display_uuid(sub_item)),
            }),
        }
    }
}

fn status_of<T>(result: &Result<T, btleplug::Error>, operation: &str) -> Status {
    match result {
        Ok(_) => Status::SUCCESS,
        Err(e) => {
            warn!(operation, error = %e, "operation failed");
            Status::FAILURE
        }
    }
}

impl Link for BtleLink {
    fn disconnect(&mut self) -> TransportResult {
        let Some(peripheral) = self.shared.peripheral.get().cloned() else {
            // Still connecting: abandon the attempt.
            self.shared.cancel.cancel();
            self.shared.link_down(Status::SUCCESS);
            return Ok(());
        };
        let shared = Arc::clone(&self.shared);
        self.runtime.spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                warn!(peer = %shared.target, error = %e, "disconnect failed");
            }
            // Some platforms never raise DeviceDisconnected for a local close.
            if !peripheral.is_connected().await.unwrap_or(false) {
                shared.link_down(Status::SUCCESS);
            }
        });
        Ok(())
    }

    fn close(&mut self) {
        self.shared.cancel.cancel();
        self.shared.subscribed().clear();
    }

    fn discover_collections(&mut self) -> TransportResult {
        let peripheral = self.peripheral()?;
        let shared = Arc::clone(&self.shared);
        self.runtime.spawn(async move {
            let result = match peripheral.discover_services().await {
                Ok(()) => Ok(to_collections(&peripheral.services())),
                Err(e) => {
                    warn!(error = %e, "service discovery failed");
                    Err(Status::FAILURE)
                }
            };
            shared.emit(TransportEvent::CollectionsDiscovered(result));
        });
        Ok(())
    }

    fn read_item(&mut self, item: &IdentityKey) -> TransportResult {
        let (peripheral, c) = self.characteristic("read", item)?;
        let (shared, item) = (Arc::clone(&self.shared), *item);
        self.runtime.spawn(async move {
            let result = peripheral.read(&c).await;
            let status = status_of(&result, "read");
            shared.emit(TransportEvent::ItemRead {
                item,
                status,
                payload: result.map(Bytes::from).unwrap_or_default(),
            });
        });
        Ok(())
    }

    fn write_item(&mut self, item: &IdentityKey, payload: &Bytes, ack: bool) -> TransportResult {
        let (peripheral, c) = self.characteristic("write", item)?;
        let (shared, item, payload) = (Arc::clone(&self.shared), *item, payload.clone());
        let write_type = if ack {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        self.runtime.spawn(async move {
            let result = peripheral.write(&c, &payload, write_type).await;
            let status = status_of(&result, "write");
            shared.emit(TransportEvent::ItemWritten { item, status });
        });
        Ok(())
    }

    fn read_sub_item(&mut self, item: &IdentityKey, sub_item: &Uuid) -> TransportResult {
        let (peripheral, d) = self.descriptor("read sub-item", item, sub_item)?;
        let (shared, item, sub_item) = (Arc::clone(&self.shared), *item, *sub_item);
        self.runtime.spawn(async move {
            let result = peripheral.read_descriptor(&d).await;
            let status = status_of(&result, "read sub-item");
            shared.emit(TransportEvent::SubItemRead {
                item,
                sub_item,
                status,
                payload: result.map(Bytes::from).unwrap_or_default(),
            });
        });
        Ok(())
    }

    fn write_sub_item(
        &mut self,
        item: &IdentityKey,
        sub_item: &Uuid,
        payload: &Bytes,
    ) -> TransportResult {
        let (peripheral, d) = self.descriptor("write sub-item", item, sub_item)?;
        let (shared, item, sub_item) = (Arc::clone(&self.shared), *item, *sub_item);
        let payload = payload.clone();
        self.runtime.spawn(async move {
            let result = peripheral.write_descriptor(&d, &payload).await;
            let status = status_of(&result, "write sub-item");
            shared.emit(TransportEvent::SubItemWritten {
                item,
                sub_item,
                status,
            });
        });
        Ok(())
    }

    fn set_change_notification(&mut self, item: &IdentityKey, enabled: bool) -> TransportResult {
        let (peripheral, c) = self.characteristic("notify", item)?;
        {
            let mut subscribed = self.shared.subscribed();
            subscribed.retain(|k| k != item);
            if enabled {
                subscribed.push(*item);
            }
        }
        let key = *item;
        let shared = Arc::clone(&self.shared);
        self.runtime.spawn(async move {
            let result = if enabled {
                peripheral.subscribe(&c).await
            } else {
                peripheral.unsubscribe(&c).await
            };
            if let Err(e) = result {
                warn!(%key, enabled, error = %e, "notification toggle failed");
                if enabled {
                    shared.subscribed().retain(|k| *k != key);
                }
            }
        });
        Ok(())
    }

    fn negotiate_max_transfer_size(&mut self, _size: u16) -> TransportResult {
        Err(TransportError::Unsupported("transfer size negotiation"))
    }

    fn read_link_quality(&mut self) -> TransportResult {
        let peripheral = self.peripheral()?;
        let shared = Arc::clone(&self.shared);
        self.runtime.spawn(async move {
            let event = match peripheral.properties().await {
                Ok(Some(props)) => match props.rssi {
                    Some(rssi) => TransportEvent::LinkQualityRead {
                        rssi,
                        status: Status::SUCCESS,
                    },
                    None => TransportEvent::LinkQualityRead {
                        rssi: 0,
                        status: Status::FAILURE,
                    },
                },
                Ok(None) | Err(_) => TransportEvent::LinkQualityRead {
                    rssi: 0,
                    status: Status::FAILURE,
                },
            };
            shared.emit(event);
        });
        Ok(())
    }
}

impl Drop for BtleLink {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {

    use pretty_assertions::assert_eq;

    use super::*;
    use gattline_core::model::uuid_from_short;

    fn characteristic(uuid: u16, flags: CharPropFlags, descriptors: &[u16]) -> Characteristic {
        let service_uuid = uuid_from_short(0x180d);
        let uuid = uuid_from_short(uuid);
        Characteristic {
            uuid,
            service_uuid,
            properties: flags,
            descriptors: descriptors
                .iter()
                .map(|d| Descriptor {
                    uuid: uuid_from_short(*d),
                    service_uuid,
                    characteristic_uuid: uuid,
                })
                .collect(),
        }
    }

    fn service() -> Service {
        Service {
            uuid: uuid_from_short(0x180d),
            primary: true,
            characteristics: BTreeSet::from([
                characteristic(0x2a37, CharPropFlags::NOTIFY, &[0x2902]),
                characteristic(0x2a37, CharPropFlags::READ | CharPropFlags::NOTIFY, &[]),
                characteristic(0x2a39, CharPropFlags::WRITE, &[]),
            ]),
        }
    }

    #[test]
    fn repeated_uuids_get_ordinal_instances() {
        let service = service();
        let ordinals: Vec<_> = instances(&service)
            .map(|(instance, c)| (display_uuid(&c.uuid), instance))
            .collect();
        let mut measurement: Vec<_> = ordinals
            .iter()
            .filter(|(uuid, _)| uuid == "2a37")
            .map(|(_, i)| *i)
            .collect();
        measurement.sort_unstable();
        assert_eq!(measurement, vec![0, 1]);
        assert!(ordinals.contains(&("2a39".to_owned(), 0)));
    }

    #[test]
    fn converts_services_to_collections() {
        let collections = to_collections(&BTreeSet::from([service()]));
        assert_eq!(collections.len(), 1);
        let collection = &collections[0];
        assert_eq!(collection.uuid, uuid_from_short(0x180d));
        assert_eq!(collection.items.len(), 3);

        let control = collection
            .items
            .iter()
            .find(|i| i.uuid == uuid_from_short(0x2a39))
            .unwrap();
        assert!(control.properties.contains(ItemProperties::WRITE));

        let with_config = collection
            .items
            .iter()
            .find(|i| i.has_sub_item(&uuid_from_short(0x2902)))
            .unwrap();
        assert!(with_config.properties.contains(ItemProperties::NOTIFY));
    }

    #[test]
    fn adjusted_config_leaves_negotiation_to_btleplug() {
        let mut config = ConnectionConfig::default();
        BtleAdapter::adjust_config(&mut config);
        assert_eq!(config.max_transfer_size, 0);
        assert!(!config.write_client_config);
        assert_eq!(config.connect_timeout, ConnectionConfig::default().connect_timeout);
    }
}
