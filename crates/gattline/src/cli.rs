//! Clap derive structures for the `gattline` CLI.
//!
//! Defines the command tree, global flags and shared value types. This file
//! is also compiled into the build script, so it may only depend on clap,
//! clap_complete and humantime.

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// gattline -- talk to Bluetooth LE attribute peers from the command line
#[derive(Debug, Parser)]
#[command(
    name = "gattline",
    version,
    about = "Scan, read, write and listen to Bluetooth LE peers",
    long_about = "A command-line client for GATT-style attribute peers.\n\n\
        Every operation is queued and issued one at a time over a single\n\
        connection, so long writes and notification setup never interleave.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Peer profile to use
    #[arg(long, short = 'p', env = "GATTLINE_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Peer address or name fragment (overrides profile)
    #[arg(long, short = 'P', env = "GATTLINE_PEER", global = true)]
    pub peer: Option<String>,

    /// Host Bluetooth adapter index (overrides profile)
    #[arg(long, short = 'a', env = "GATTLINE_ADAPTER", global = true)]
    pub adapter: Option<usize>,

    /// Connect timeout, e.g. "10s" (overrides profile)
    #[arg(long, short = 't', env = "GATTLINE_TIMEOUT", value_parser = parse_duration, global = true)]
    pub timeout: Option<Duration>,

    /// Output format [default: from config, else table]
    #[arg(long, short = 'o', env = "GATTLINE_OUTPUT", global = true)]
    pub output: Option<OutputFormat>,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

pub fn parse_duration(raw: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(raw)
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

/// How attribute values are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ValueEncoding {
    /// Lowercase hex bytes separated by spaces
    #[default]
    Hex,
    /// UTF-8 text (lossy)
    Text,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan for advertising peers
    #[command(alias = "s")]
    Scan(ScanArgs),

    /// Connect and list the peer's collections and items
    #[command(alias = "ls")]
    Services(ServicesArgs),

    /// Read an item or one of its sub-items
    #[command(alias = "r")]
    Read(ReadArgs),

    /// Write an item or one of its sub-items
    #[command(alias = "w")]
    Write(WriteArgs),

    /// Enable notifications on an item and print what arrives
    #[command(alias = "l")]
    Listen(ListenArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  SCAN
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// How long to listen, e.g. "5s" [default: from config]
    #[arg(long, short = 'd', value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Keep peers whose name or address contains this
    #[arg(long, short = 'n')]
    pub name: Option<String>,

    /// Keep peers advertising this service (repeatable)
    #[arg(long = "service", short = 's', value_name = "UUID")]
    pub services: Vec<String>,

    /// Drop peers weaker than this RSSI (dBm)
    #[arg(long, allow_negative_numbers = true)]
    pub min_rssi: Option<i16>,

    /// Only peers broadcasting vendor service data
    #[arg(long)]
    pub vendor: bool,

    /// Vendor product id to keep (repeatable, implies --vendor)
    #[arg(long = "product", value_parser = parse_byte)]
    pub products: Vec<u8>,

    /// Match vendor adverts in binding mode (implies --vendor)
    #[arg(long)]
    pub binding: bool,

    /// Match vendor adverts in booting mode (implies --vendor)
    #[arg(long)]
    pub booting: bool,
}

/// Accepts decimal or `0x`-prefixed hex.
pub fn parse_byte(raw: &str) -> Result<u8, std::num::ParseIntError> {
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => raw.parse(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  SERVICES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ServicesArgs {
    /// Only show this collection
    #[arg(long, short = 'c', value_name = "UUID")]
    pub collection: Option<String>,

    /// Also read every readable item
    #[arg(long)]
    pub values: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  READ / WRITE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Identifies one item on the peer.
#[derive(Debug, Args)]
pub struct ItemRef {
    /// Collection UUID (16-bit short form like 180d, or full)
    pub collection: String,

    /// Item UUID (16-bit short form like 2a37, or full)
    pub item: String,

    /// Instance index when the item UUID repeats
    #[arg(long, short = 'i')]
    pub instance: Option<u16>,
}

#[derive(Debug, Args)]
pub struct ReadArgs {
    #[command(flatten)]
    pub target: ItemRef,

    /// Read this sub-item (descriptor) instead of the item value
    #[arg(long, short = 'D', value_name = "UUID")]
    pub descriptor: Option<String>,

    /// How to print the value
    #[arg(long, short = 'e', default_value = "hex")]
    pub encoding: ValueEncoding,
}

#[derive(Debug, Args)]
pub struct WriteArgs {
    #[command(flatten)]
    pub target: ItemRef,

    /// Payload: hex bytes ("01 02", "0x0102", "01:02") or text with --text
    pub value: String,

    /// Treat the value as UTF-8 text rather than hex
    #[arg(long)]
    pub text: bool,

    /// Write without waiting for an acknowledgement
    #[arg(long)]
    pub no_ack: bool,

    /// Write this sub-item (descriptor) instead of the item value
    #[arg(long, short = 'D', value_name = "UUID", conflicts_with_all = ["no_ack", "chunk"])]
    pub descriptor: Option<String>,

    /// Split the payload into chunks of this many bytes
    #[arg(long, conflicts_with = "instance")]
    pub chunk: Option<usize>,

    /// Pause between chunks, e.g. "20ms"
    #[arg(long, value_parser = parse_duration, default_value = "0ms", requires = "chunk")]
    pub gap: Duration,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  LISTEN
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ListenArgs {
    #[command(flatten)]
    pub target: ItemRef,

    /// Stop after this many notifications
    #[arg(long, short = 'n')]
    pub count: Option<usize>,

    /// Stop after this long, e.g. "30s"
    #[arg(long, short = 'd', value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Also report signal strength at this interval, e.g. "2s"
    #[arg(long, value_parser = parse_duration)]
    pub rssi: Option<Duration>,

    /// How to print values
    #[arg(long, short = 'e', default_value = "hex")]
    pub encoding: ValueEncoding,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the resolved configuration
    Show,

    /// Print the config file location
    Path,

    /// Write a config file with one profile
    ///
    /// The profile takes its peer and adapter from the global --peer and
    /// --adapter flags.
    Init {
        /// Profile name
        #[arg(long, default_value = "default")]
        name: String,

        /// Replace an existing config file
        #[arg(long)]
        force: bool,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_byte_in_either_base() {
        assert_eq!(parse_byte("0x0c").unwrap(), 12);
        assert_eq!(parse_byte("12").unwrap(), 12);
        assert!(parse_byte("0x100").is_err());
    }

    #[test]
    fn write_flags() {
        let cli = Cli::try_parse_from([
            "gattline", "write", "180d", "2a39", "01 02 03", "--chunk", "2", "--gap", "20ms",
        ])
        .unwrap();
        let Command::Write(args) = cli.command else {
            panic!("expected write");
        };
        assert_eq!(args.chunk, Some(2));
        assert_eq!(args.gap, Duration::from_millis(20));
        assert!(!args.no_ack);
    }

    #[test]
    fn gap_requires_chunk() {
        assert!(Cli::try_parse_from(["gattline", "write", "180d", "2a39", "01", "--gap", "5ms"]).is_err());
    }
}
