// ── Peer discovery ──
//
// Scanning is independent of any connection actor: it drives the btleplug
// central directly and returns a snapshot of what was heard.

use std::collections::BTreeMap;
use std::time::Duration;

use btleplug::api::{Central, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use gattline_core::PeerAddress;

use crate::advert::{AdvertFilter, VendorAdvert};
use crate::error::BtleError;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Open the `index`-th Bluetooth adapter on this host.
pub async fn central(index: usize) -> Result<Adapter, BtleError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    if adapters.is_empty() {
        return Err(BtleError::NoAdapter);
    }
    let available = adapters.len();
    adapters
        .into_iter()
        .nth(index)
        .ok_or(BtleError::AdapterIndex { index, available })
}

/// Human-readable descriptions of every adapter on this host.
pub async fn list_adapters() -> Result<Vec<String>, BtleError> {
    let manager = Manager::new().await?;
    let mut names = Vec::new();
    for adapter in manager.adapters().await? {
        names.push(adapter.adapter_info().await?);
    }
    Ok(names)
}

/// A peer heard during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredPeer {
    pub name: Option<String>,
    pub address: PeerAddress,
    pub rssi: Option<i16>,
    pub tx_power: Option<i16>,
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    pub service_data: BTreeMap<Uuid, Vec<u8>>,
    pub services: Vec<Uuid>,
    /// Decoded vendor service data, when the peer broadcasts it.
    pub vendor: Option<VendorAdvert>,
}

impl DiscoveredPeer {
    fn from_properties(address: PeerAddress, props: PeripheralProperties) -> Self {
        let vendor = VendorAdvert::from_service_data(&props.service_data);
        Self {
            name: props.local_name,
            address,
            rssi: props.rssi,
            tx_power: props.tx_power_level,
            manufacturer_data: props.manufacturer_data.into_iter().collect(),
            service_data: props.service_data.into_iter().collect(),
            services: props.services,
            vendor,
        }
    }

    /// Case-insensitive match on name or address, as typed by a user.
    pub fn matches_pattern(&self, pattern: &str) -> bool {
        let pattern = pattern.to_lowercase();
        self.address.to_string().to_lowercase().contains(&pattern)
            || self
                .name
                .as_deref()
                .is_some_and(|name| name.to_lowercase().contains(&pattern))
    }
}

/// Which scan results to keep.
#[derive(Debug, Clone, Default)]
pub struct PeerFilter {
    pub pattern: Option<String>,
    pub services: Vec<Uuid>,
    pub min_rssi: Option<i16>,
    pub vendor: Option<AdvertFilter>,
}

impl PeerFilter {
    pub fn matches(&self, peer: &DiscoveredPeer) -> bool {
        if let Some(pattern) = &self.pattern {
            if !peer.matches_pattern(pattern) {
                return false;
            }
        }
        if !self.services.is_empty() && !self.services.iter().any(|s| peer.services.contains(s)) {
            return false;
        }
        if let Some(min) = self.min_rssi {
            if peer.rssi.is_none_or(|rssi| rssi < min) {
                return false;
            }
        }
        match &self.vendor {
            Some(filter) => peer.vendor.as_ref().is_some_and(|advert| filter.matches(advert)),
            None => true,
        }
    }
}

/// Scan for `duration` and return matching peers, strongest signal first.
pub async fn scan(
    central: &Adapter,
    duration: Duration,
    filter: &PeerFilter,
) -> Result<Vec<DiscoveredPeer>, BtleError> {
    info!(?duration, "scanning");
    central.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;
    let peers = snapshot(central).await;
    central.stop_scan().await?;

    let mut peers: Vec<_> = peers?.into_iter().filter(|p| filter.matches(p)).collect();
    peers.sort_by(|a, b| b.rssi.cmp(&a.rssi));
    debug!(found = peers.len(), "scan finished");
    Ok(peers)
}

/// Resolve a name or address fragment to the first matching peer.
pub async fn find_peer(
    central: &Adapter,
    pattern: &str,
    duration: Duration,
) -> Result<DiscoveredPeer, BtleError> {
    let filter = PeerFilter {
        pattern: Some(pattern.to_owned()),
        ..PeerFilter::default()
    };
    scan(central, duration, &filter)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| BtleError::NoMatch(pattern.to_owned()))
}

async fn snapshot(central: &Adapter) -> Result<Vec<DiscoveredPeer>, BtleError> {
    let mut peers = Vec::new();
    for peripheral in central.peripherals().await? {
        if let Some(props) = peripheral.properties().await? {
            let address = address_of(&peripheral);
            peers.push(DiscoveredPeer::from_properties(address, props));
        }
    }
    Ok(peers)
}

pub(crate) fn address_of(peripheral: &Peripheral) -> PeerAddress {
    PeerAddress::new(peripheral.address().into_inner())
}

/// Locate the peripheral for `target`, scanning for up to `window` when the
/// central has not seen it yet.
pub(crate) async fn locate(
    central: &Adapter,
    target: PeerAddress,
    window: Duration,
) -> Result<Peripheral, BtleError> {
    if let Some(found) = known(central, target).await? {
        return Ok(found);
    }

    debug!(peer = %target, "peer not cached, scanning");
    central.start_scan(ScanFilter::default()).await?;
    let located = tokio::time::timeout(window, async {
        loop {
            match known(central, target).await {
                Ok(Some(found)) => return Ok(found),
                Ok(None) => tokio::time::sleep(POLL_INTERVAL).await,
                Err(e) => return Err(e),
            }
        }
    })
    .await;
    central.stop_scan().await?;

    match located {
        Ok(result) => result,
        Err(_) => Err(BtleError::PeripheralNotFound(target)),
    }
}

async fn known(central: &Adapter, target: PeerAddress) -> Result<Option<Peripheral>, BtleError> {
    Ok(central
        .peripherals()
        .await?
        .into_iter()
        .find(|p| address_of(p) == target))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn peer(name: Option<&str>, rssi: Option<i16>) -> DiscoveredPeer {
        DiscoveredPeer {
            name: name.map(str::to_owned),
            address: "C4:7C:8D:6A:11:02".parse().unwrap(),
            rssi,
            tx_power: None,
            manufacturer_data: BTreeMap::new(),
            service_data: BTreeMap::new(),
            services: vec![gattline_core::model::uuid_from_short(0x180d)],
            vendor: None,
        }
    }

    #[test]
    fn pattern_matches_name_or_address() {
        let p = peer(Some("Polar H10"), Some(-60));
        assert!(p.matches_pattern("polar"));
        assert!(p.matches_pattern("6a:11"));
        assert!(!p.matches_pattern("garmin"));
        assert!(!peer(None, None).matches_pattern("polar"));
    }

    #[test]
    fn filter_on_rssi_and_services() {
        let filter = PeerFilter {
            min_rssi: Some(-70),
            services: vec![gattline_core::model::uuid_from_short(0x180d)],
            ..PeerFilter::default()
        };
        assert!(filter.matches(&peer(None, Some(-60))));
        assert!(!filter.matches(&peer(None, Some(-80))));
        assert!(!filter.matches(&peer(None, None)));

        let other = PeerFilter {
            services: vec![gattline_core::model::uuid_from_short(0x180f)],
            ..PeerFilter::default()
        };
        assert!(!other.matches(&peer(None, Some(-60))));
    }

    #[test]
    fn vendor_filter_needs_vendor_data() {
        let filter = PeerFilter {
            vendor: Some(AdvertFilter::new()),
            ..PeerFilter::default()
        };
        assert!(!filter.matches(&peer(Some("sensor"), Some(-50))));
    }
}
