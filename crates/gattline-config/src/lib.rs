//! Profile configuration for gattline.
//!
//! TOML profiles merged with `GATTLINE_*` environment overrides, and
//! translation to `gattline_core::ConnectionConfig`. The core never reads
//! files; the CLI loads a profile here and hands the result in.

mod duration;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use gattline_core::config::{DEFAULT_MAX_TRANSFER_SIZE, MAX_TRANSFER_SIZE_LIMIT};
use gattline_core::{ConnectionConfig, PeerAddress};

/// Environment variable that points at an alternative config file.
pub const CONFIG_PATH_ENV: &str = "GATTLINE_CONFIG";

const ENV_PREFIX: &str = "GATTLINE_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found (available: {available})")]
    ProfileNotFound { name: String, available: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when `--profile` is not given.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named peer profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Explicit name first, then the configured default, then `"default"`.
    pub fn active_profile_name(&self, explicit: Option<&str>) -> String {
        explicit
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound {
                name: name.into(),
                available: self.available_profiles(),
            })
    }

    /// Comma-separated profile names, or `(none)`.
    pub fn available_profiles(&self) -> String {
        if self.profiles.is_empty() {
            "(none)".into()
        } else {
            self.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
        }
    }
}

/// Settings applied to every profile unless the profile overrides them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Defaults {
    pub output: String,
    pub color: String,
    /// Index of the host Bluetooth adapter.
    pub adapter: usize,
    #[serde(with = "duration")]
    pub scan_duration: Duration,
    #[serde(with = "duration")]
    pub connect_timeout: Duration,
    #[serde(with = "duration")]
    pub disconnect_timeout: Duration,
    #[serde(with = "duration")]
    pub command_timeout: Duration,
}

impl Default for Defaults {
    fn default() -> Self {
        let connection = ConnectionConfig::default();
        Self {
            output: "table".into(),
            color: "auto".into(),
            adapter: 0,
            scan_duration: Duration::from_secs(5),
            connect_timeout: connection.connect_timeout,
            disconnect_timeout: connection.disconnect_timeout,
            command_timeout: connection.command_timeout,
        }
    }
}

/// A named peer profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// Peer address (`AA:BB:CC:DD:EE:FF`) or a name/address fragment to scan for.
    pub peer: Option<String>,

    /// Override the adapter index.
    pub adapter: Option<usize>,

    #[serde(default, with = "duration::option", skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<Duration>,

    #[serde(default, with = "duration::option", skip_serializing_if = "Option::is_none")]
    pub disconnect_timeout: Option<Duration>,

    /// Per-command timeout. `"0s"` disables it.
    #[serde(default, with = "duration::option", skip_serializing_if = "Option::is_none")]
    pub command_timeout: Option<Duration>,

    /// Transfer size requested after discovery. 0 skips negotiation.
    pub max_transfer_size: Option<u16>,

    /// Poll link quality at this interval while connected.
    #[serde(default, with = "duration::option", skip_serializing_if = "Option::is_none")]
    pub link_quality_interval: Option<Duration>,

    pub write_client_config: Option<bool>,
}

// ── Peer target ─────────────────────────────────────────────────────

/// How a profile (or `--peer`) names its peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerTarget {
    Address(PeerAddress),
    /// Name or address fragment resolved by scanning.
    Pattern(String),
}

impl PeerTarget {
    pub fn parse(raw: &str) -> Self {
        raw.parse()
            .map_or_else(|_| Self::Pattern(raw.to_owned()), Self::Address)
    }
}

impl fmt::Display for PeerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(addr) => write!(f, "{addr}"),
            Self::Pattern(pattern) => write!(f, "'{pattern}'"),
        }
    }
}

impl Profile {
    pub fn target(&self) -> Option<PeerTarget> {
        self.peer.as_deref().map(PeerTarget::parse)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path: `GATTLINE_CONFIG`, then platform conventions.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    ProjectDirs::from("dev", "gattline", "gattline").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("gattline");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` merged with `GATTLINE_*` overrides. Nested keys use a
/// double underscore: `GATTLINE_DEFAULTS__ADAPTER=1`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist or is invalid.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to the canonical path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `ConnectionConfig` from a profile layered over the defaults.
pub fn profile_to_connection_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<ConnectionConfig, ConfigError> {
    let base = ConnectionConfig::default();

    let max_transfer_size = profile.max_transfer_size.unwrap_or(base.max_transfer_size);
    if max_transfer_size != 0
        && !(DEFAULT_MAX_TRANSFER_SIZE..=MAX_TRANSFER_SIZE_LIMIT).contains(&max_transfer_size)
    {
        return Err(ConfigError::Validation {
            field: "max_transfer_size".into(),
            reason: format!(
                "{max_transfer_size} outside {DEFAULT_MAX_TRANSFER_SIZE}..={MAX_TRANSFER_SIZE_LIMIT} (0 skips negotiation)"
            ),
        });
    }

    let connect_timeout = profile.connect_timeout.unwrap_or(defaults.connect_timeout);
    if connect_timeout.is_zero() {
        return Err(ConfigError::Validation {
            field: "connect_timeout".into(),
            reason: "must be greater than zero".into(),
        });
    }

    Ok(ConnectionConfig {
        connect_timeout,
        disconnect_timeout: profile
            .disconnect_timeout
            .unwrap_or(defaults.disconnect_timeout),
        command_timeout: profile.command_timeout.unwrap_or(defaults.command_timeout),
        max_transfer_size,
        link_quality_interval: profile.link_quality_interval,
        write_client_config: profile
            .write_client_config
            .unwrap_or(base.write_client_config),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const SAMPLE: &str = r#"
default_profile = "strap"

[defaults]
adapter = 1
command_timeout = "3s"

[profiles.strap]
peer = "C4:7C:8D:6A:11:02"
connect_timeout = "5s"
max_transfer_size = 247

[profiles.kitchen]
peer = "thermo"
link_quality_interval = "1s 500ms"
"#;

    #[test]
    fn loads_profiles_and_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("config.toml", SAMPLE)?;
            let cfg = load_config_from(Path::new("config.toml")).unwrap();

            assert_eq!(cfg.default_profile.as_deref(), Some("strap"));
            assert_eq!(cfg.defaults.adapter, 1);
            assert_eq!(cfg.defaults.command_timeout, Duration::from_secs(3));
            assert_eq!(cfg.defaults.output, "table");

            let strap = cfg.profile("strap").unwrap();
            assert_eq!(strap.connect_timeout, Some(Duration::from_secs(5)));
            assert_eq!(
                strap.target(),
                Some(PeerTarget::Address("C4:7C:8D:6A:11:02".parse().unwrap()))
            );

            let kitchen = cfg.profile("kitchen").unwrap();
            assert_eq!(kitchen.target(), Some(PeerTarget::Pattern("thermo".into())));
            assert_eq!(
                kitchen.link_quality_interval,
                Some(Duration::from_millis(1500))
            );
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("config.toml", SAMPLE)?;
            jail.set_env("GATTLINE_DEFAULTS__ADAPTER", "2");
            jail.set_env("GATTLINE_DEFAULT_PROFILE", "kitchen");
            let cfg = load_config_from(Path::new("config.toml")).unwrap();
            assert_eq!(cfg.defaults.adapter, 2);
            assert_eq!(cfg.default_profile.as_deref(), Some("kitchen"));
            Ok(())
        });
    }

    #[test]
    fn missing_file_yields_defaults() {
        figment::Jail::expect_with(|_| {
            let cfg = load_config_from(Path::new("absent.toml")).unwrap();
            assert_eq!(cfg, Config::default());
            Ok(())
        });
    }

    #[test]
    fn unknown_profile_lists_available() {
        let mut cfg = Config::default();
        cfg.profiles.insert("a".into(), Profile::default());
        cfg.profiles.insert("b".into(), Profile::default());
        let err = cfg.profile("c").unwrap_err();
        assert_eq!(err.to_string(), "profile 'c' not found (available: a, b)");
        assert_eq!(Config::default().available_profiles(), "(none)");
    }

    #[test]
    fn active_profile_precedence() {
        let cfg = Config {
            default_profile: Some("home".into()),
            ..Config::default()
        };
        assert_eq!(cfg.active_profile_name(Some("lab")), "lab");
        assert_eq!(cfg.active_profile_name(None), "home");
        let bare = Config {
            default_profile: None,
            ..Config::default()
        };
        assert_eq!(bare.active_profile_name(None), "default");
    }

    #[test]
    fn profile_overrides_defaults() {
        let defaults = Defaults {
            command_timeout: Duration::from_secs(3),
            ..Defaults::default()
        };
        let profile = Profile {
            connect_timeout: Some(Duration::from_secs(5)),
            max_transfer_size: Some(247),
            link_quality_interval: Some(Duration::from_secs(1)),
            write_client_config: Some(false),
            ..Profile::default()
        };
        let config = profile_to_connection_config(&profile, &defaults).unwrap();
        assert_eq!(
            config,
            ConnectionConfig {
                connect_timeout: Duration::from_secs(5),
                disconnect_timeout: Duration::from_millis(1500),
                command_timeout: Duration::from_secs(3),
                max_transfer_size: 247,
                link_quality_interval: Some(Duration::from_secs(1)),
                write_client_config: false,
            }
        );
    }

    #[test]
    fn rejects_out_of_range_transfer_size() {
        let profile = Profile {
            max_transfer_size: Some(600),
            ..Profile::default()
        };
        let err = profile_to_connection_config(&profile, &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "max_transfer_size"));

        let skip = Profile {
            max_transfer_size: Some(0),
            ..Profile::default()
        };
        assert_eq!(
            profile_to_connection_config(&skip, &Defaults::default())
                .unwrap()
                .max_transfer_size,
            0
        );
    }

    #[test]
    fn save_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.profiles.insert(
            "strap".into(),
            Profile {
                peer: Some("C4:7C:8D:6A:11:02".into()),
                command_timeout: Some(Duration::from_millis(750)),
                ..Profile::default()
            },
        );
        save_config_to(&cfg, &path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("command_timeout = \"750ms\""));
        assert!(!written.contains("link_quality_interval"));

        let loaded: Config = toml::from_str(&written).unwrap();
        assert_eq!(loaded, cfg);
    }
}
