// ── Attribute model ──
//
// Everything in this module is pure data: peer addresses, identity keys,
// the discovered attribute table and payload formatting helpers. Nothing
// here talks to a transport or holds connection state.

pub mod attribute;
pub mod hex;
pub mod identity;

// ── Re-exports ──────────────────────────────────────────────────────

pub use attribute::{
    AttributeTable, CLIENT_CONFIG_UUID, Collection, Item, ItemProperties, NotifyMode, SubItem,
};
pub use hex::{HexError, format_hex, parse_hex};
pub use identity::{
    BASE_UUID, IdentityKey, PeerAddress, PeerAddressError, display_uuid, parse_uuid, short_form,
    uuid_from_short,
};
