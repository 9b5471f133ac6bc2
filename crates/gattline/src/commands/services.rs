//! Services command handler: lists the discovered attribute table.

use serde::Serialize;
use tabled::Tabled;

use gattline_core::model::display_uuid;
use gattline_core::{AttributeTable, Command as CoreCommand, ItemProperties};

use crate::cli::{GlobalOpts, ServicesArgs, ValueEncoding};
use crate::config::Context;
use crate::error::CliError;
use crate::output;

use super::session::{Session, uuid_arg};

/// One item of the attribute table, flattened for display.
#[derive(Debug, Serialize)]
struct ItemEntry {
    collection: String,
    item: String,
    instance: u16,
    properties: String,
    sub_items: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    /// Read command for the item when it is readable.
    #[serde(skip)]
    read: Option<CoreCommand>,
}

#[derive(Tabled)]
struct ItemRow {
    #[tabled(rename = "Collection")]
    collection: String,
    #[tabled(rename = "Item")]
    item: String,
    #[tabled(rename = "#")]
    instance: u16,
    #[tabled(rename = "Properties")]
    properties: String,
    #[tabled(rename = "Sub-items")]
    sub_items: String,
    #[tabled(rename = "Value")]
    value: String,
}

impl From<&ItemEntry> for ItemRow {
    fn from(e: &ItemEntry) -> Self {
        Self {
            collection: e.collection.clone(),
            item: e.item.clone(),
            instance: e.instance,
            properties: e.properties.clone(),
            sub_items: e.sub_items.join(", "),
            value: e.value.clone().unwrap_or_default(),
        }
    }
}

fn entries(table: &AttributeTable, only: Option<uuid::Uuid>) -> Vec<ItemEntry> {
    table
        .collections()
        .iter()
        .filter(|c| only.is_none_or(|uuid| c.uuid == uuid))
        .flat_map(|c| {
            c.items.iter().map(|item| ItemEntry {
                collection: display_uuid(&c.uuid),
                item: display_uuid(&item.uuid),
                instance: item.instance,
                properties: item.properties.to_string(),
                sub_items: item.sub_items.iter().map(|s| display_uuid(&s.uuid)).collect(),
                value: None,
                read: item.properties.contains(ItemProperties::READ).then(|| {
                    CoreCommand::read(c.uuid, item.uuid).with_instance(item.instance)
                }),
            })
        })
        .collect()
}

pub async fn handle(
    args: ServicesArgs,
    global: &GlobalOpts,
    ctx: &Context,
) -> Result<(), CliError> {
    let only = args
        .collection
        .as_deref()
        .map(|raw| uuid_arg("collection", raw))
        .transpose()?;

    let session = Session::open(global, ctx).await?;
    let table = session.connection.attributes();
    let mut listing = entries(&table, only);

    if args.values {
        for entry in &mut listing {
            let Some(command) = entry.read.take() else {
                continue;
            };
            entry.value = Some(match session.connection.execute(command).await {
                Ok(out) => output::format_value(&out.into_bytes(), ValueEncoding::Hex),
                Err(e) => format!("<{e}>"),
            });
        }
    }
    session.close().await;

    let out = output::render_list(ctx.format, &listing, |e| ItemRow::from(e), |e| {
        format!("{}/{}#{}", e.collection, e.item, e.instance)
    })?;
    output::print_output(&out, ctx.quiet);
    Ok(())
}

#[cfg(test)]
mod tests {
    use gattline_core::model::uuid_from_short;
    use gattline_core::{Collection, Item};

    use super::*;

    fn table() -> AttributeTable {
        AttributeTable::new(vec![
            Collection::new(uuid_from_short(0x180d)).with_item(
                Item::new(
                    uuid_from_short(0x2a37),
                    0,
                    ItemProperties::NOTIFY | ItemProperties::READ,
                )
                .with_sub_item(uuid_from_short(0x2902)),
            ),
            Collection::new(uuid_from_short(0x180f)).with_item(Item::new(
                uuid_from_short(0x2a19),
                0,
                ItemProperties::READ,
            )),
        ])
    }

    #[test]
    fn flattens_every_item() {
        let listing = entries(&table(), None);
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].collection, "180d");
        assert_eq!(listing[0].sub_items, vec!["2902".to_owned()]);
    }

    #[test]
    fn filters_on_collection() {
        let listing = entries(&table(), Some(uuid_from_short(0x180f)));
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].item, "2a19");
    }
}
