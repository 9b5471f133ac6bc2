// gattline-btle: Bluetooth LE transport for gattline-core.
//
// `BtleAdapter` plugs btleplug into the connection actor; `scan` and
// `advert` cover discovery, which needs no connection at all.

pub mod adapter;
pub mod advert;
pub mod error;
pub mod scan;

pub use adapter::{BtleAdapter, DEFAULT_SCAN_WINDOW};
pub use advert::{AdvertFilter, FrameControl, VendorAdvert};
pub use error::BtleError;
pub use scan::{DiscoveredPeer, PeerFilter, central, find_peer, list_adapters, scan};
