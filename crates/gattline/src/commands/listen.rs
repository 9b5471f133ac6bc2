//! Listen command handler: stream notifications until stopped.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use gattline_core::model::{display_uuid, format_hex};
use gattline_core::{Command as CoreCommand, LifecycleEvent, Notification};

use crate::cli::{GlobalOpts, ListenArgs, OutputFormat, ValueEncoding};
use crate::config::Context;
use crate::error::CliError;
use crate::output;

use super::session::{Session, Target, status};

/// One line of listen output.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Line {
    Notification {
        elapsed_ms: u64,
        item: String,
        hex: String,
        value: String,
    },
    LinkQuality {
        elapsed_ms: u64,
        rssi: i16,
    },
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn notification_line(n: &Notification, start: Instant, encoding: ValueEncoding) -> Line {
    Line::Notification {
        elapsed_ms: elapsed_ms(start),
        item: display_uuid(&n.item),
        hex: format_hex(&n.payload, None),
        value: output::format_value(&n.payload, encoding),
    }
}

/// Structured formats emit one compact JSON object per line.
fn render_line(line: &Line, format: OutputFormat, color: bool) -> Result<String, CliError> {
    match format {
        OutputFormat::Json | OutputFormat::JsonCompact | OutputFormat::Yaml => {
            output::render_json(line, true)
        }
        OutputFormat::Plain => Ok(match line {
            Line::Notification { value, .. } => value.clone(),
            Line::LinkQuality { rssi, .. } => format!("rssi {rssi}"),
        }),
        OutputFormat::Table => Ok(match line {
            Line::Notification {
                elapsed_ms,
                item,
                value,
                ..
            } => format!(
                "{} {item}  {value}",
                output::dim(&format!("[{:>8.3}s]", millis_to_secs(*elapsed_ms)), color)
            ),
            Line::LinkQuality { elapsed_ms, rssi } => format!(
                "{} rssi  {}",
                output::dim(&format!("[{:>8.3}s]", millis_to_secs(*elapsed_ms)), color),
                output::paint_rssi(Some(*rssi), color)
            ),
        }),
    }
}

fn emit(line: &Line, ctx: &Context) -> Result<(), CliError> {
    output::print_output(&render_line(line, ctx.format, ctx.color)?, ctx.quiet);
    Ok(())
}

#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn millis_to_secs(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

pub async fn handle(args: ListenArgs, global: &GlobalOpts, ctx: &Context) -> Result<(), CliError> {
    let target = Target::parse(&args.target)?;
    let session = Session::open(global, ctx).await?;
    let connection = &session.connection;

    let mut events = connection.events();
    if let Some(interval) = args.rssi {
        connection.start_link_quality_monitor(interval);
    }

    let command = target.pin(CoreCommand::enable_notify(target.collection, target.item));
    let mut stream = match connection.subscribe(command).await {
        Ok(stream) => stream,
        Err(e) => {
            session.close().await;
            return Err(e.into());
        }
    };
    status(
        ctx,
        &format!(
            "Listening on {}/{} (Ctrl-C to stop)",
            display_uuid(&target.collection),
            display_uuid(&target.item)
        ),
    );

    let start = Instant::now();
    let deadline = tokio::time::sleep(args.duration.unwrap_or(Duration::MAX));
    tokio::pin!(deadline);
    let mut received = 0usize;

    let outcome = loop {
        if args.count.is_some_and(|max| received >= max) {
            break Ok(());
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            () = &mut deadline => break Ok(()),
            next = stream.recv() => {
                let Some(notification) = next else {
                    break Err(CliError::ConnectionLost);
                };
                received = received.saturating_add(1);
                let line = notification_line(&notification, start, args.encoding);
                if let Err(e) = emit(&line, ctx) {
                    break Err(e);
                }
            }
            event = events.recv() => match event {
                Ok(LifecycleEvent::LinkQuality { rssi }) => {
                    let line = Line::LinkQuality { elapsed_ms: elapsed_ms(start), rssi };
                    if let Err(e) = emit(&line, ctx) {
                        break Err(e);
                    }
                }
                Ok(LifecycleEvent::Disconnected { .. }) | Err(RecvError::Closed) => {
                    break Err(CliError::ConnectionLost);
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
            },
        }
    };

    if outcome.is_ok() {
        if let Err(e) = connection
            .disable_notify(target.collection, target.item)
            .await
        {
            tracing::debug!(error = %e, "disable on exit failed");
        }
    }
    session.close().await;
    status(ctx, &format!("{received} notifications"));
    outcome
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_are_tagged() {
        let line = Line::LinkQuality {
            elapsed_ms: 1500,
            rssi: -61,
        };
        assert_eq!(
            render_line(&line, OutputFormat::Json, false).unwrap(),
            r#"{"event":"link_quality","elapsed_ms":1500,"rssi":-61}"#
        );
    }

    #[test]
    fn plain_prints_value_only() {
        let line = Line::Notification {
            elapsed_ms: 10,
            item: "2a37".into(),
            hex: "0048".into(),
            value: "00 48".into(),
        };
        assert_eq!(render_line(&line, OutputFormat::Plain, false).unwrap(), "00 48");
        let table = render_line(&line, OutputFormat::Table, false).unwrap();
        assert!(table.ends_with("2a37  00 48"));
        assert!(table.contains("0.010s"));
    }
}
