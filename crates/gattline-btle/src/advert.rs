//! Vendor service-data advertisements.
//!
//! Sensors in this family broadcast a service-data record under one of two
//! 16-bit UUIDs. The payload starts with a frame-control byte, then a
//! product id, then the device address in over-the-air (reversed) order:
//!
//! ```text
//! [frame control] [product id] [addr5 addr4 addr3 addr2 addr1 addr0] [data...]
//! ```

use serde::Serialize;
use uuid::Uuid;

use gattline_core::PeerAddress;
use gattline_core::model::{short_form, uuid_from_short};

/// Service-data UUIDs the vendor format is carried under.
pub const VENDOR_SERVICE_UUIDS: [u16; 2] = [0xfdcd, 0xfff9];

const HEADER_LEN: usize = 8;

// Raw advertising record: a 3-byte flags structure, then length, AD type,
// and the little-endian service UUID before the service data proper.
const RECORD_UUID_OFFSET: usize = 5;
const RECORD_DATA_OFFSET: usize = 7;

/// Decoded frame-control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameControl {
    pub encrypted: bool,
    pub binding: bool,
    pub booting: bool,
    pub version: u8,
    pub event: bool,
    pub has_bind: bool,
}

impl FrameControl {
    pub const fn from_byte(b: u8) -> Self {
        Self {
            encrypted: b & 0x01 != 0,
            binding: b & 0x02 != 0,
            booting: b & 0x04 != 0,
            version: (b >> 3) & 0x07,
            event: b & 0x40 != 0,
            has_bind: b & 0x80 != 0,
        }
    }
}

/// One parsed vendor advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VendorAdvert {
    pub frame_control: FrameControl,
    pub product_id: u8,
    pub address: PeerAddress,
    pub data: Vec<u8>,
}

impl VendorAdvert {
    /// Parse the service-data payload (everything after the service UUID).
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < HEADER_LEN {
            return None;
        }
        let (header, data) = payload.split_at(HEADER_LEN);
        let mut reversed = [0u8; 6];
        reversed.copy_from_slice(header.get(2..8)?);
        Some(Self {
            frame_control: FrameControl::from_byte(*header.first()?),
            product_id: *header.get(1)?,
            address: PeerAddress::from_reversed(reversed),
            data: data.to_vec(),
        })
    }

    /// Parse a raw advertising record as delivered by platforms that expose
    /// the full scan record rather than decoded service data.
    pub fn from_record(record: &[u8]) -> Option<Self> {
        if record.len() <= RECORD_DATA_OFFSET + 7 {
            return None;
        }
        let uuid = record.get(RECORD_UUID_OFFSET..RECORD_DATA_OFFSET)?;
        let short = u16::from_le_bytes([*uuid.first()?, *uuid.get(1)?]);
        if !VENDOR_SERVICE_UUIDS.contains(&short) {
            return None;
        }
        Self::parse(record.get(RECORD_DATA_OFFSET..)?)
    }

    /// Pick the vendor record out of a decoded service-data map.
    pub fn from_service_data<'a>(
        entries: impl IntoIterator<Item = (&'a Uuid, &'a Vec<u8>)>,
    ) -> Option<Self> {
        entries
            .into_iter()
            .filter(|(uuid, _)| short_form(uuid).is_some_and(|s| VENDOR_SERVICE_UUIDS.contains(&s)))
            .find_map(|(_, payload)| Self::parse(payload))
    }
}

/// Returns the full UUIDs the vendor format is advertised under.
pub fn vendor_service_uuids() -> [Uuid; 2] {
    VENDOR_SERVICE_UUIDS.map(uuid_from_short)
}

/// Match vendor advertisements on binding state, product and address.
///
/// Empty product or address lists match anything. An advertisement that
/// claims to be both binding and booting is malformed and never matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertFilter {
    pub binding: bool,
    pub booting: bool,
    pub product_ids: Vec<u8>,
    pub addresses: Vec<PeerAddress>,
}

impl AdvertFilter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn binding(mut self, binding: bool) -> Self {
        self.binding = binding;
        self
    }

    #[must_use]
    pub fn booting(mut self, booting: bool) -> Self {
        self.booting = booting;
        self
    }

    #[must_use]
    pub fn product(mut self, product_id: u8) -> Self {
        self.product_ids.push(product_id);
        self
    }

    #[must_use]
    pub fn address(mut self, address: PeerAddress) -> Self {
        self.addresses.push(address);
        self
    }

    pub fn matches(&self, advert: &VendorAdvert) -> bool {
        let fc = advert.frame_control;
        if fc.binding && fc.booting {
            return false;
        }
        if fc.binding != self.binding || fc.booting != self.booting {
            return false;
        }
        if !self.product_ids.is_empty() && !self.product_ids.contains(&advert.product_id) {
            return false;
        }
        self.addresses.is_empty() || self.addresses.contains(&advert.address)
    }

    pub fn matches_record(&self, record: &[u8]) -> bool {
        VendorAdvert::from_record(record).is_some_and(|advert| self.matches(&advert))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    // Flags AD, then service data 0xfdcd: fc=0x30 (version 6), product 0x0c,
    // address 58:2D:34:11:22:33 reversed, then two data bytes.
    const RECORD: [u8; 17] = [
        0x02, 0x01, 0x06, 0x0d, 0x16, 0xcd, 0xfd, 0x30, 0x0c, 0x33, 0x22, 0x11, 0x34, 0x2d,
        0x58, 0x01, 0x02,
    ];

    fn address() -> PeerAddress {
        "58:2D:34:11:22:33".parse().unwrap()
    }

    #[test]
    fn frame_control_bits() {
        let fc = FrameControl::from_byte(0b1100_1011);
        assert!(fc.encrypted);
        assert!(fc.binding);
        assert!(!fc.booting);
        assert_eq!(fc.version, 1);
        assert!(fc.event);
        assert!(fc.has_bind);
    }

    #[test]
    fn parses_raw_record() {
        let advert = VendorAdvert::from_record(&RECORD).unwrap();
        assert_eq!(advert.product_id, 0x0c);
        assert_eq!(advert.address, address());
        assert_eq!(advert.frame_control.version, 6);
        assert_eq!(advert.data, vec![0x01, 0x02]);
    }

    #[test]
    fn rejects_short_or_foreign_records() {
        assert!(VendorAdvert::from_record(&RECORD[..14]).is_none());
        let mut foreign = RECORD;
        foreign[5] = 0x0f;
        assert!(VendorAdvert::from_record(&foreign).is_none());
    }

    #[test]
    fn picks_vendor_entry_from_service_data() {
        let mut data = HashMap::new();
        data.insert(uuid_from_short(0x180f), vec![0x64]);
        data.insert(uuid_from_short(0xfff9), RECORD[7..].to_vec());
        let advert = VendorAdvert::from_service_data(&data).unwrap();
        assert_eq!(advert.address, address());
    }

    #[test]
    fn filter_on_product_and_address() {
        let filter = AdvertFilter::new().product(0x0c).address(address());
        assert!(filter.matches_record(&RECORD));
        assert!(!AdvertFilter::new().product(0x01).matches_record(&RECORD));
        assert!(AdvertFilter::new().matches_record(&RECORD));
    }

    #[test]
    fn filter_requires_matching_flags() {
        let mut binding = RECORD;
        binding[7] |= 0x02;
        assert!(!AdvertFilter::new().matches_record(&binding));
        assert!(AdvertFilter::new().binding(true).matches_record(&binding));

        binding[7] |= 0x04;
        let both = AdvertFilter::new().binding(true).booting(true);
        assert!(!both.matches_record(&binding));
    }
}
