//! Read command handler.

use serde::Serialize;

use gattline_core::Command as CoreCommand;
use gattline_core::model::{display_uuid, format_hex};

use crate::cli::{GlobalOpts, ReadArgs};
use crate::config::Context;
use crate::error::CliError;
use crate::output;

use super::session::{Session, Target, uuid_arg};

#[derive(Debug, Serialize)]
struct ReadResult {
    peer: String,
    collection: String,
    item: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sub_item: Option<String>,
    /// Raw bytes as lowercase hex, independent of `--encoding`.
    hex: String,
    value: String,
}

pub async fn handle(args: ReadArgs, global: &GlobalOpts, ctx: &Context) -> Result<(), CliError> {
    let target = Target::parse(&args.target)?;
    let sub_item = args
        .descriptor
        .as_deref()
        .map(|raw| uuid_arg("descriptor", raw))
        .transpose()?;

    let command = match sub_item {
        Some(sub) => CoreCommand::read_descriptor(target.collection, target.item, sub),
        None => CoreCommand::read(target.collection, target.item),
    };

    let session = Session::open(global, ctx).await?;
    let result = session.connection.execute(target.pin(command)).await;
    let peer = session.peer;
    session.close().await;
    let bytes = result?.into_bytes();

    let read = ReadResult {
        peer: peer.to_string(),
        collection: display_uuid(&target.collection),
        item: display_uuid(&target.item),
        sub_item: sub_item.as_ref().map(display_uuid),
        hex: format_hex(&bytes, None),
        value: output::format_value(&bytes, args.encoding),
    };
    let out = output::render_single(ctx.format, &read, |r| r.value.clone(), |r| r.value.clone())?;
    output::print_output(&out, ctx.quiet);
    Ok(())
}
