// ── Discovered attribute table ──
//
// The peer's attribute hierarchy as reported by discovery:
// collections (services) contain items (characteristics) which carry
// sub-items (descriptors). Lookups here back every "not found" failure
// the dispatcher reports.

use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use super::identity::{IdentityKey, uuid_from_short};
use crate::error::CoreError;

/// Client characteristic configuration sub-item (0x2902).
pub const CLIENT_CONFIG_UUID: Uuid = uuid_from_short(0x2902);

// ── ItemProperties ──────────────────────────────────────────────────

/// Capability bits an item advertises.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ItemProperties(u8);

impl ItemProperties {
    pub const BROADCAST: Self = Self(0x01);
    pub const READ: Self = Self(0x02);
    pub const WRITE_NO_ACK: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);
    pub const INDICATE: Self = Self(0x20);
    pub const SIGNED_WRITE: Self = Self(0x40);
    pub const EXTENDED: Self = Self(0x80);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for ItemProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Display for ItemProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(ItemProperties, &str); 8] = [
            (ItemProperties::BROADCAST, "broadcast"),
            (ItemProperties::READ, "read"),
            (ItemProperties::WRITE_NO_ACK, "write-no-ack"),
            (ItemProperties::WRITE, "write"),
            (ItemProperties::NOTIFY, "notify"),
            (ItemProperties::INDICATE, "indicate"),
            (ItemProperties::SIGNED_WRITE, "signed-write"),
            (ItemProperties::EXTENDED, "extended"),
        ];
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join(","))
    }
}

/// Which change-event flavour an item is subscribed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyMode {
    Notify,
    Indicate,
}

impl NotifyMode {
    /// Value written to the client configuration sub-item to enable this mode.
    pub const fn client_config_value(self) -> [u8; 2] {
        match self {
            Self::Notify => [0x01, 0x00],
            Self::Indicate => [0x02, 0x00],
        }
    }
}

// ── Hierarchy ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubItem {
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
    pub uuid: Uuid,
    /// Ordinal among items sharing this UUID inside the collection.
    pub instance: u16,
    pub properties: ItemProperties,
    pub sub_items: Vec<SubItem>,
}

impl Item {
    pub fn new(uuid: Uuid, instance: u16, properties: ItemProperties) -> Self {
        Self {
            uuid,
            instance,
            properties,
            sub_items: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_sub_item(mut self, uuid: Uuid) -> Self {
        self.sub_items.push(SubItem { uuid });
        self
    }

    pub fn has_sub_item(&self, uuid: &Uuid) -> bool {
        self.sub_items.iter().any(|s| s.uuid == *uuid)
    }

    pub fn key(&self, collection: Uuid) -> IdentityKey {
        IdentityKey::new(collection, self.uuid, self.instance)
    }

    /// Notify is preferred over indicate when an item offers both.
    pub fn notify_mode(&self) -> Option<NotifyMode> {
        if self.properties.contains(ItemProperties::NOTIFY) {
            Some(NotifyMode::Notify)
        } else if self.properties.contains(ItemProperties::INDICATE) {
            Some(NotifyMode::Indicate)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collection {
    pub uuid: Uuid,
    pub primary: bool,
    pub items: Vec<Item>,
}

impl Collection {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            primary: true,
            items: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_item(mut self, item: Item) -> Self {
        self.items.push(item);
        self
    }
}

// ── AttributeTable ──────────────────────────────────────────────────

/// Snapshot of the last discovery result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AttributeTable {
    collections: Vec<Collection>,
}

impl AttributeTable {
    pub fn new(collections: Vec<Collection>) -> Self {
        Self { collections }
    }

    pub fn collections(&self) -> &[Collection] {
        &self.collections
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn collection(&self, uuid: &Uuid) -> Option<&Collection> {
        self.collections.iter().find(|c| c.uuid == *uuid)
    }

    pub fn item(&self, key: &IdentityKey) -> Option<&Item> {
        self.collection(&key.collection)?
            .items
            .iter()
            .find(|i| i.uuid == key.item && i.instance == key.instance)
    }

    /// Resolve a command target to one concrete item.
    ///
    /// With an explicit `instance` that item is returned as-is. Otherwise
    /// the first same-UUID item satisfying `capable` wins, falling back to
    /// the first same-UUID item so a capability mismatch is reported by the
    /// peer rather than hidden here.
    pub fn resolve(
        &self,
        collection: &Uuid,
        item: &Uuid,
        instance: Option<u16>,
        capable: impl Fn(&Item) -> bool,
    ) -> Result<&Item, CoreError> {
        let found = self
            .collection(collection)
            .ok_or(CoreError::CollectionNotFound {
                collection: *collection,
            })?;

        let mut candidates = found.items.iter().filter(|i| i.uuid == *item);
        let resolved = match instance {
            Some(index) => candidates.find(|i| i.instance == index),
            None => {
                let all: Vec<&Item> = candidates.collect();
                all.iter()
                    .copied()
                    .find(|i| capable(i))
                    .or_else(|| all.first().copied())
            }
        };

        resolved.ok_or(CoreError::ItemNotFound {
            collection: *collection,
            item: *item,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn heart_rate() -> AttributeTable {
        AttributeTable::new(vec![
            Collection::new(uuid_from_short(0x180d))
                .with_item(Item::new(
                    uuid_from_short(0x2a37),
                    0,
                    ItemProperties::READ,
                ))
                .with_item(
                    Item::new(
                        uuid_from_short(0x2a37),
                        1,
                        ItemProperties::NOTIFY | ItemProperties::INDICATE,
                    )
                    .with_sub_item(CLIENT_CONFIG_UUID),
                ),
        ])
    }

    #[test]
    fn resolve_prefers_capable_instance() {
        let table = heart_rate();
        let item = table
            .resolve(&uuid_from_short(0x180d), &uuid_from_short(0x2a37), None, |i| {
                i.notify_mode().is_some()
            })
            .unwrap();
        assert_eq!(item.instance, 1);
        assert_eq!(item.notify_mode(), Some(NotifyMode::Notify));
        assert!(item.has_sub_item(&CLIENT_CONFIG_UUID));
    }

    #[test]
    fn resolve_honours_explicit_instance() {
        let table = heart_rate();
        let item = table
            .resolve(
                &uuid_from_short(0x180d),
                &uuid_from_short(0x2a37),
                Some(0),
                |_| false,
            )
            .unwrap();
        assert_eq!(item.instance, 0);
    }

    #[test]
    fn resolve_reports_missing_collection_and_item() {
        let table = heart_rate();
        let err = table
            .resolve(&uuid_from_short(0x180f), &uuid_from_short(0x2a19), None, |_| true)
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::CollectionNotFound {
                collection: uuid_from_short(0x180f)
            }
        );

        let err = table
            .resolve(&uuid_from_short(0x180d), &uuid_from_short(0x2a38), None, |_| true)
            .unwrap_err();
        assert!(matches!(err, CoreError::ItemNotFound { .. }));
    }

    #[test]
    fn properties_display_lists_flags() {
        let props = ItemProperties::READ | ItemProperties::NOTIFY;
        assert_eq!(props.to_string(), "read,notify");
        assert_eq!(props.bits(), 0x12);
    }

    #[test]
    fn client_config_values() {
        assert_eq!(NotifyMode::Notify.client_config_value(), [0x01, 0x00]);
        assert_eq!(NotifyMode::Indicate.client_config_value(), [0x02, 0x00]);
    }
}
