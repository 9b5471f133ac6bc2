//! Output formatting: table, JSON, YAML, plain.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`,
//! structured formats use serde, plain emits one line per item.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use gattline_core::model::format_hex;

use crate::cli::{ColorMode, OutputFormat, ValueEncoding};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
    }
}

/// Signal strength, green when strong and red when marginal.
pub fn paint_rssi(rssi: Option<i16>, color: bool) -> String {
    let Some(rssi) = rssi else {
        return "-".into();
    };
    let text = format!("{rssi} dBm");
    if !color {
        return text;
    }
    match rssi {
        -60.. => text.green().to_string(),
        -80..=-61 => text.yellow().to_string(),
        _ => text.red().to_string(),
    }
}

/// Dim secondary text such as timestamps and status lines.
pub fn dim(text: &str, color: bool) -> String {
    if color {
        text.dimmed().to_string()
    } else {
        text.to_owned()
    }
}

// ── Values ───────────────────────────────────────────────────────────

pub fn format_value(bytes: &[u8], encoding: ValueEncoding) -> String {
    match encoding {
        ValueEncoding::Hex => format_hex(bytes, Some(' ')),
        ValueEncoding::Text => String::from_utf8_lossy(bytes).into_owned(),
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list of serde-serializable + tabled items in the chosen format.
pub fn render_list<T, R>(
    format: OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    plain_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
    R: Tabled,
{
    match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            Ok(render_table(&rows))
        }
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Yaml => render_yaml(data),
        OutputFormat::Plain => Ok(data.iter().map(&plain_fn).collect::<Vec<_>>().join("\n")),
    }
}

/// Render a single serde-serializable item in the chosen format.
///
/// Table rendering uses `detail_fn`, since single-item views are not tables.
pub fn render_single<T>(
    format: OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    plain_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize + ?Sized,
{
    match format {
        OutputFormat::Table => Ok(detail_fn(data)),
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Yaml => render_yaml(data),
        OutputFormat::Plain => Ok(plain_fn(data)),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

// ── Format-specific renderers ────────────────────────────────────────

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

pub(crate) fn render_json<T: serde::Serialize + ?Sized>(
    data: &T,
    compact: bool,
) -> Result<String, CliError> {
    let rendered = if compact {
        serde_json::to_string(data)
    } else {
        serde_json::to_string_pretty(data)
    };
    rendered.map_err(|e| CliError::Serialize(e.to_string()))
}

fn render_yaml<T: serde::Serialize + ?Sized>(data: &T) -> Result<String, CliError> {
    serde_yaml::to_string(data).map_err(|e| CliError::Serialize(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde::Serialize;

    use super::*;

    #[derive(Serialize)]
    struct Entry {
        name: &'static str,
        level: u8,
    }

    #[derive(Tabled)]
    struct EntryRow {
        #[tabled(rename = "Name")]
        name: String,
    }

    fn entries() -> Vec<Entry> {
        vec![
            Entry {
                name: "battery",
                level: 90,
            },
            Entry {
                name: "heart",
                level: 3,
            },
        ]
    }

    fn row(e: &Entry) -> EntryRow {
        EntryRow {
            name: e.name.into(),
        }
    }

    #[test]
    fn plain_is_one_line_per_item() {
        let out = render_list(OutputFormat::Plain, &entries(), row, |e| e.name.into()).unwrap();
        assert_eq!(out, "battery\nheart");
    }

    #[test]
    fn compact_json_is_single_line() {
        let out = render_list(OutputFormat::JsonCompact, &entries(), row, |e| e.name.into())
            .unwrap();
        assert_eq!(
            out,
            r#"[{"name":"battery","level":90},{"name":"heart","level":3}]"#
        );
    }

    #[test]
    fn table_has_header() {
        let out = render_list(OutputFormat::Table, &entries(), row, |e| e.name.into()).unwrap();
        assert!(out.contains("Name"));
        assert!(out.contains("heart"));
    }

    #[test]
    fn values_render_as_hex_or_text() {
        assert_eq!(format_value(&[0x68, 0x69], ValueEncoding::Hex), "68 69");
        assert_eq!(format_value(b"hi", ValueEncoding::Text), "hi");
    }

    #[test]
    fn rssi_without_color() {
        assert_eq!(paint_rssi(Some(-42), false), "-42 dBm");
        assert_eq!(paint_rssi(None, false), "-");
    }
}
