//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config, Context, Profile};
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Path ────────────────────────────────────────────────────
        ConfigCommand::Path => {
            println!("{}", config::config_path().display());
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let ctx = Context::resolve(global, config::load_config()?)?;
            let out = output::render_single(
                ctx.format,
                &ctx.config,
                |c| toml::to_string_pretty(c).unwrap_or_else(|e| format!("<{e}>")),
                |_| config::config_path().display().to_string(),
            )?;
            output::print_output(&out, ctx.quiet);
            Ok(())
        }

        // ── Init ────────────────────────────────────────────────────
        ConfigCommand::Init { name, force } => {
            let peer = global.peer.clone();
            let path = config::config_path();
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            if let Some(peer) = &peer {
                if peer.trim().is_empty() {
                    return Err(CliError::Validation {
                        field: "peer".into(),
                        reason: "cannot be empty".into(),
                    });
                }
            }

            let mut cfg = Config {
                default_profile: Some(name.clone()),
                ..Config::default()
            };
            cfg.profiles.insert(
                name.clone(),
                Profile {
                    peer,
                    adapter: global.adapter,
                    ..Profile::default()
                },
            );

            let written = config::save_config(&cfg)?;
            if !global.quiet {
                eprintln!("✓ Configuration written to {}", written.display());
                eprintln!("  Default profile: {name}");
            }
            Ok(())
        }
    }
}
