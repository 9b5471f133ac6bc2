//! CLI configuration: a thin layer over `gattline_config` that applies
//! `GlobalOpts` overrides (--peer, --adapter, --timeout, --output).

use clap::ValueEnum;

use gattline_btle::BtleAdapter;
use gattline_core::ConnectionConfig;

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;

pub use gattline_config::{
    Config, PeerTarget, Profile, config_path, load_config, profile_to_connection_config,
    save_config,
};

/// Everything a handler needs besides its own arguments.
#[derive(Debug)]
pub struct Context {
    pub config: Config,
    pub profile_name: String,
    pub profile: Profile,
    pub format: OutputFormat,
    pub color: bool,
    pub quiet: bool,
}

impl Context {
    pub fn resolve(global: &GlobalOpts, config: Config) -> Result<Self, CliError> {
        let profile_name = config.active_profile_name(global.profile.as_deref());
        let profile = match config.profile(&profile_name) {
            Ok(profile) => profile.clone(),
            // An implicit default profile may legitimately be absent.
            Err(_) if global.profile.is_none() => Profile::default(),
            Err(e) => return Err(e.into()),
        };
        let format = global
            .output
            .unwrap_or_else(|| output_from_config(&config.defaults.output));
        Ok(Self {
            profile_name,
            profile,
            format,
            color: crate::output::should_color(global.color),
            quiet: global.quiet,
            config,
        })
    }

    /// Flag > profile > defaults.
    pub fn adapter_index(&self, global: &GlobalOpts) -> usize {
        global
            .adapter
            .or(self.profile.adapter)
            .unwrap_or(self.config.defaults.adapter)
    }

    pub fn peer_target(&self, global: &GlobalOpts) -> Result<PeerTarget, CliError> {
        global
            .peer
            .as_deref()
            .map(PeerTarget::parse)
            .or_else(|| self.profile.target())
            .ok_or(CliError::NoPeer)
    }

    /// Connection settings for the btleplug transport.
    pub fn connection_config(&self, global: &GlobalOpts) -> Result<ConnectionConfig, CliError> {
        let mut config = profile_to_connection_config(&self.profile, &self.config.defaults)?;
        if let Some(timeout) = global.timeout {
            if timeout.is_zero() {
                return Err(CliError::Validation {
                    field: "timeout".into(),
                    reason: "must be greater than zero".into(),
                });
            }
            config.connect_timeout = timeout;
        }
        BtleAdapter::adjust_config(&mut config);
        Ok(config)
    }
}

fn output_from_config(raw: &str) -> OutputFormat {
    OutputFormat::from_str(raw, true).unwrap_or(OutputFormat::Table)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use clap::Parser;

    use super::*;
    use crate::cli::Cli;

    fn global(args: &[&str]) -> GlobalOpts {
        let mut argv = vec!["gattline"];
        argv.extend_from_slice(args);
        argv.extend_from_slice(&["config", "path"]);
        Cli::try_parse_from(argv).unwrap().global
    }

    fn config_with_profile() -> Config {
        let mut config = Config::default();
        config.defaults.output = "json".into();
        config.profiles.insert(
            "default".into(),
            Profile {
                peer: Some("C4:7C:8D:6A:11:02".into()),
                adapter: Some(1),
                ..Profile::default()
            },
        );
        config
    }

    #[test]
    fn flags_override_profile() {
        let g = global(&["--peer", "polar", "--adapter", "2", "-o", "plain"]);
        let ctx = Context::resolve(&g, config_with_profile()).unwrap();
        assert_eq!(ctx.peer_target(&g).unwrap(), PeerTarget::Pattern("polar".into()));
        assert_eq!(ctx.adapter_index(&g), 2);
        assert_eq!(ctx.format, OutputFormat::Plain);
    }

    #[test]
    fn profile_and_defaults_fill_gaps() {
        let g = global(&[]);
        let ctx = Context::resolve(&g, config_with_profile()).unwrap();
        assert!(matches!(ctx.peer_target(&g).unwrap(), PeerTarget::Address(_)));
        assert_eq!(ctx.adapter_index(&g), 1);
        assert_eq!(ctx.format, OutputFormat::Json);
    }

    #[test]
    fn missing_explicit_profile_is_an_error() {
        let g = global(&["--profile", "lab"]);
        let err = Context::resolve(&g, Config::default()).unwrap_err();
        assert!(matches!(err, CliError::ProfileNotFound { .. }));

        let implicit = Context::resolve(&global(&[]), Config::default()).unwrap();
        assert!(matches!(implicit.peer_target(&global(&[])), Err(CliError::NoPeer)));
    }

    #[test]
    fn timeout_flag_sets_connect_timeout() {
        let g = global(&["--timeout", "7s"]);
        let ctx = Context::resolve(&g, Config::default()).unwrap();
        let config = ctx.connection_config(&g).unwrap();
        assert_eq!(config.connect_timeout, Duration::from_secs(7));
        assert_eq!(config.max_transfer_size, 0);
    }
}
