//! Command dispatch: bridges CLI args -> core commands -> output formatting.

pub mod config_cmd;
pub mod listen;
pub mod read;
pub mod scan;
pub mod services;
pub mod session;
pub mod write;

use crate::cli::{Command, GlobalOpts};
use crate::config::Context;
use crate::error::CliError;

/// Dispatch a Bluetooth-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts, ctx: &Context) -> Result<(), CliError> {
    match cmd {
        Command::Scan(args) => scan::handle(args, global, ctx).await,
        Command::Services(args) => services::handle(args, global, ctx).await,
        Command::Read(args) => read::handle(args, global, ctx).await,
        Command::Write(args) => write::handle(args, global, ctx).await,
        Command::Listen(args) => listen::handle(args, global, ctx).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}
