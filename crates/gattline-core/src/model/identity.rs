// ── Core identity types ──
//
// PeerAddress names the remote device; IdentityKey names one physical
// item on it. Short-form UUID helpers live here as well since every
// display path goes through them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ── Short-form UUIDs ────────────────────────────────────────────────

/// The Bluetooth base UUID `00000000-0000-1000-8000-00805f9b34fb`.
pub const BASE_UUID: Uuid = Uuid::from_u128(0x0000_0000_0000_1000_8000_0080_5f9b_34fb);

const SHORT_MASK: u128 = 0xffff_ffff << 96;

/// Expand a 16-bit assigned number into a full UUID.
pub const fn uuid_from_short(short: u16) -> Uuid {
    // `as` is the only widening available in a const fn
    #[allow(clippy::as_conversions)]
    let widened = short as u128;
    Uuid::from_u128(BASE_UUID.as_u128() | (widened << 96))
}

/// Compact a UUID to its 16-bit form when it sits on the base UUID.
pub fn short_form(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    if value & !SHORT_MASK != BASE_UUID.as_u128() {
        return None;
    }
    u16::try_from(value >> 96).ok()
}

/// Render a UUID as 4 hex digits when it has a short form, full otherwise.
pub fn display_uuid(uuid: &Uuid) -> String {
    match short_form(uuid) {
        Some(short) => format!("{short:04x}"),
        None => uuid.to_string(),
    }
}

/// Parse either a 16-bit (`180f`, `0x180F`), 32-bit or full UUID.
pub fn parse_uuid(raw: &str) -> Result<Uuid, uuid::Error> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.len() <= 8 && !digits.is_empty() && digits.chars().all(|c| c.is_ascii_hexdigit()) {
        if let Ok(value) = u32::from_str_radix(digits, 16) {
            let widened = u128::from(value) << 96;
            return Ok(Uuid::from_u128(BASE_UUID.as_u128() | widened));
        }
    }
    Uuid::parse_str(trimmed)
}

// ── PeerAddress ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid peer address '{0}': expected six hex octets")]
pub struct PeerAddressError(pub String);

/// Hardware address of a peer, normalized to `AA:BB:CC:DD:EE:FF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddress([u8; 6]);

impl PeerAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Build an address from the little-endian byte order used on the air.
    pub fn from_reversed(bytes: [u8; 6]) -> Self {
        let mut octets = bytes;
        octets.reverse();
        Self(octets)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for PeerAddress {
    type Err = PeerAddressError;

    /// Accepts colon-separated, dash-separated, or bare hex.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ':' | '-'))
            .collect();
        if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(PeerAddressError(s.to_owned()));
        }

        let mut octets = [0u8; 6];
        for (slot, pair) in octets.iter_mut().zip(digits.as_bytes().chunks(2)) {
            let pair = std::str::from_utf8(pair).map_err(|_| PeerAddressError(s.to_owned()))?;
            *slot = u8::from_str_radix(pair, 16).map_err(|_| PeerAddressError(s.to_owned()))?;
        }
        Ok(Self(octets))
    }
}

impl Serialize for PeerAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeerAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ── IdentityKey ─────────────────────────────────────────────────────

/// Stable key for one physical item on the peer.
///
/// Peers may expose several items sharing a UUID, within one collection or
/// across collections. The instance index keeps them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    pub collection: Uuid,
    pub item: Uuid,
    pub instance: u16,
}

impl IdentityKey {
    pub const fn new(collection: Uuid, item: Uuid, instance: u16) -> Self {
        Self {
            collection,
            item,
            instance,
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}",
            display_uuid(&self.collection),
            display_uuid(&self.item),
            self.instance
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn short_uuid_expands_onto_base() {
        let uuid = uuid_from_short(0x2902);
        assert_eq!(uuid.to_string(), "00002902-0000-1000-8000-00805f9b34fb");
        assert_eq!(short_form(&uuid), Some(0x2902));
    }

    #[test]
    fn vendor_uuid_has_no_short_form() {
        let uuid = Uuid::parse_str("0000fe59-0000-1000-8000-00805f9b34fc").unwrap();
        assert_eq!(short_form(&uuid), None);
        assert_eq!(display_uuid(&uuid), "0000fe59-0000-1000-8000-00805f9b34fc");
    }

    #[test]
    fn thirty_two_bit_uuid_is_not_short() {
        let uuid = parse_uuid("12345678").unwrap();
        assert_eq!(uuid.to_string(), "12345678-0000-1000-8000-00805f9b34fb");
        assert_eq!(short_form(&uuid), None);
    }

    #[test]
    fn parse_uuid_accepts_prefixed_short_form() {
        assert_eq!(parse_uuid("0x180F").unwrap(), uuid_from_short(0x180f));
        assert_eq!(parse_uuid("2a19").unwrap(), uuid_from_short(0x2a19));
    }

    #[test]
    fn parse_uuid_accepts_full_form() {
        let raw = "6e400001-b5a3-f393-e0a9-e50e24dcca9e";
        assert_eq!(parse_uuid(raw).unwrap().to_string(), raw);
    }

    #[test]
    fn peer_address_normalizes_case_and_separators() {
        let addr: PeerAddress = "aa-bb-cc-dd-ee-0f".parse().unwrap();
        assert_eq!(addr.to_string(), "AA:BB:CC:DD:EE:0F");

        let bare: PeerAddress = "aabbccddee0f".parse().unwrap();
        assert_eq!(bare, addr);
    }

    #[test]
    fn peer_address_rejects_short_input() {
        let err = "AA:BB:CC".parse::<PeerAddress>().unwrap_err();
        assert_eq!(err, PeerAddressError("AA:BB:CC".into()));
    }

    #[test]
    fn peer_address_from_reversed_bytes() {
        let addr = PeerAddress::from_reversed([0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(addr.to_string(), "01:02:03:04:05:06");
    }

    #[test]
    fn identity_key_display_uses_short_uuids() {
        let key = IdentityKey::new(uuid_from_short(0x180d), uuid_from_short(0x2a37), 1);
        assert_eq!(key.to_string(), "180d|2a37|1");
    }
}
