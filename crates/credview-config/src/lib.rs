//! Shared configuration for the credview CLI and embedders.
//!
//! A TOML file at the platform config path, layered under
//! `CREDVIEW_`-prefixed environment variables, translated to
//! `credview_core::ViewConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use credview_core::ViewConfig;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// CLI defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// View engine tuning.
    #[serde(default)]
    pub view: ViewSettings,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// One of "table", "json", "yaml", "plain".
    #[serde(default = "default_output")]
    pub output: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}

/// File form of `ViewConfig`; durations are plain integers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ViewSettings {
    pub command_buffer: usize,
    pub event_buffer: usize,
    pub confirmation_timeout_secs: u64,
    pub sweep_interval_ms: u64,
    pub sequenced_refresh: bool,
    pub accept_unregistered_stored: bool,
}

impl Default for ViewSettings {
    fn default() -> Self {
        let core = ViewConfig::default();
        Self {
            command_buffer: core.command_buffer,
            event_buffer: core.event_buffer,
            confirmation_timeout_secs: core.confirmation_timeout.as_secs(),
            sweep_interval_ms: u64::try_from(core.sweep_interval.as_millis()).unwrap_or(1000),
            sequenced_refresh: core.sequenced_refresh,
            accept_unregistered_stored: core.accept_unregistered_stored,
        }
    }
}

impl ViewSettings {
    /// Build a validated `ViewConfig`.
    pub fn to_view_config(&self) -> Result<ViewConfig, ConfigError> {
        if self.confirmation_timeout_secs == 0 {
            return Err(ConfigError::Validation {
                field: "view.confirmation_timeout_secs".into(),
                reason: "must be greater than zero".into(),
            });
        }

        let config = ViewConfig {
            command_buffer: self.command_buffer,
            event_buffer: self.event_buffer,
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
            sequenced_refresh: self.sequenced_refresh,
            accept_unregistered_stored: self.accept_unregistered_stored,
        };
        config.validate().map_err(|e| ConfigError::Validation {
            field: "view".into(),
            reason: e.to_string(),
        })?;
        Ok(config)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "credview", "credview").map_or_else(
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
    p.push("credview");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from defaults, a TOML file and the environment.
///
/// `path` overrides the platform config path. A missing file is not an
/// error. Nested keys use a double underscore in env var names, e.g.
/// `CREDVIEW_VIEW__SEQUENCED_REFRESH=false`.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("CREDVIEW_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Render config as TOML.
pub fn to_toml(cfg: &Config) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(cfg)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_core() {
        let cfg = ViewSettings::default().to_view_config().unwrap();
        assert_eq!(cfg, ViewConfig::default());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg.defaults.output, "table");
        assert_eq!(cfg.view, ViewSettings::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[defaults]\noutput = \"json\"\n\n[view]\nconfirmation_timeout_secs = 5\nsequenced_refresh = false"
        )
        .unwrap();

        let cfg = load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.defaults.output, "json");
        assert_eq!(cfg.view.confirmation_timeout_secs, 5);
        assert!(!cfg.view.sequenced_refresh);
        assert_eq!(cfg.view.command_buffer, 64);

        let view = cfg.view.to_view_config().unwrap();
        assert_eq!(view.confirmation_timeout, Duration::from_secs(5));
    }

    #[test]
    fn zero_values_are_rejected() {
        let settings = ViewSettings {
            sweep_interval_ms: 0,
            ..ViewSettings::default()
        };
        assert!(matches!(
            settings.to_view_config(),
            Err(ConfigError::Validation { .. })
        ));

        let settings = ViewSettings {
            confirmation_timeout_secs: 0,
            ..ViewSettings::default()
        };
        assert!(matches!(
            settings.to_view_config(),
            Err(ConfigError::Validation { field, .. }) if field == "view.confirmation_timeout_secs"
        ));
    }

    #[test]
    fn config_renders_as_toml() {
        let rendered = to_toml(&Config::default()).unwrap();
        assert!(rendered.contains("[view]"));
        assert!(rendered.contains("sequenced_refresh = true"));
    }
}
