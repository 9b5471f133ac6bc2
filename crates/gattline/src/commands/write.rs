//! Write command handler.

use gattline_core::Command as CoreCommand;

use crate::cli::{GlobalOpts, WriteArgs};
use crate::config::Context;
use crate::error::CliError;

use super::session::{Session, Target, payload_arg, status, uuid_arg};

pub async fn handle(args: WriteArgs, global: &GlobalOpts, ctx: &Context) -> Result<(), CliError> {
    let target = Target::parse(&args.target)?;
    let payload = payload_arg(&args.value, args.text)?;
    let sub_item = args
        .descriptor
        .as_deref()
        .map(|raw| uuid_arg("descriptor", raw))
        .transpose()?;
    if args.chunk == Some(0) {
        return Err(CliError::Validation {
            field: "chunk".into(),
            reason: "must be at least 1 byte".into(),
        });
    }
    let len = payload.len();

    let session = Session::open(global, ctx).await?;
    let connection = &session.connection;
    let result = match (sub_item, args.chunk) {
        (Some(sub), _) => connection
            .execute(target.pin(CoreCommand::write_descriptor(
                target.collection,
                target.item,
                sub,
                payload,
            )))
            .await
            .map(drop),
        (None, Some(chunk)) => {
            connection
                .write_chunked(
                    target.collection,
                    target.item,
                    payload,
                    chunk,
                    args.gap,
                    !args.no_ack,
                )
                .await
        }
        (None, None) => {
            let command = if args.no_ack {
                CoreCommand::write_no_ack(target.collection, target.item, payload)
            } else {
                CoreCommand::write(target.collection, target.item, payload)
            };
            connection.execute(target.pin(command)).await.map(drop)
        }
    };
    session.close().await;
    result?;

    status(ctx, &format!("✓ Wrote {len} bytes"));
    Ok(())
}
