//! Scenario files for `credview replay`.
//!
//! A scenario seeds the registry and the credential store, then lists
//! the steps to apply to the view in order.

use std::path::Path;

use serde::Deserialize;

use credview_config::ViewSettings;
use credview_core::{ConnectUrl, Target};

use crate::error::CliError;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Targets the registry knows about at activation.
    #[serde(default)]
    pub registry: Vec<Target>,

    /// Targets the store already holds credentials for.
    #[serde(default)]
    pub stored: Vec<Target>,

    /// Artificial latency for every store call.
    #[serde(default)]
    pub latency_ms: u64,

    /// Overrides `[view]` from the config file.
    #[serde(default)]
    pub view: Option<ViewSettings>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One scripted input.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Step {
    /// Issue a full refresh.
    Refresh,
    /// Replace the registry snapshot (triggers a refresh).
    PublishRegistry { targets: Vec<Target> },
    /// Store credentials through the store, which notifies the bus.
    Store { target: Target },
    /// Publish a `CredentialsStored` event without touching the store.
    NotifyStored { target: ConnectUrl },
    /// Publish a `CredentialsDeleted` event without touching the store.
    NotifyDeleted { target: ConnectUrl },
    CheckRow {
        index: usize,
        #[serde(default = "checked")]
        checked: bool,
    },
    CheckTarget {
        target: ConnectUrl,
        #[serde(default = "checked")]
        checked: bool,
    },
    CheckHeader {
        #[serde(default = "checked")]
        checked: bool,
    },
    DeleteSelected,
    RetryFailed,
    /// Make the store reject deletes for `target`.
    RejectDeletes { target: ConnectUrl },
    /// Make the next `count` fetches fail.
    FailFetches { count: usize },
    /// Wait until no refresh or delete is in flight.
    Settle,
    Sleep { ms: u64 },
}

fn checked() -> bool {
    true
}

impl Step {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Refresh => "refresh",
            Self::PublishRegistry { .. } => "publish-registry",
            Self::Store { .. } => "store",
            Self::NotifyStored { .. } => "notify-stored",
            Self::NotifyDeleted { .. } => "notify-deleted",
            Self::CheckRow { .. } => "check-row",
            Self::CheckTarget { .. } => "check-target",
            Self::CheckHeader { .. } => "check-header",
            Self::DeleteSelected => "delete-selected",
            Self::RetryFailed => "retry-failed",
            Self::RejectDeletes { .. } => "reject-deletes",
            Self::FailFetches { .. } => "fail-fetches",
            Self::Settle => "settle",
            Self::Sleep { .. } => "sleep",
        }
    }
}

impl Scenario {
    /// Read a scenario; `.json` files are JSON, anything else TOML.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CliError::ScenarioNotFound {
                    path: display.clone(),
                }
            } else {
                CliError::Io(e)
            }
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let parsed = if is_json {
            serde_json::from_str(&text).map_err(|e| e.to_string())
        } else {
            toml::from_str(&text).map_err(|e| e.to_string())
        };

        parsed.map_err(|reason| CliError::ScenarioInvalid {
            path: display,
            reason,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_toml_steps() {
        let scenario: Scenario = toml::from_str(
            r#"
            registry = [{ connectUrl = "a", alias = "A" }]

            [[steps]]
            action = "check-row"
            index = 0

            [[steps]]
            action = "notify-deleted"
            target = "a"
            "#,
        )
        .unwrap();

        assert_eq!(scenario.registry[0].alias, "A");
        assert!(matches!(
            scenario.steps[0],
            Step::CheckRow {
                index: 0,
                checked: true
            }
        ));
        assert_eq!(scenario.steps[1].action(), "notify-deleted");
    }

    #[test]
    fn parses_json_steps() {
        let scenario: Scenario = serde_json::from_str(
            r#"{ "steps": [ { "action": "check-header", "checked": false }, { "action": "delete-selected" } ] }"#,
        )
        .unwrap();

        assert!(matches!(scenario.steps[0], Step::CheckHeader { checked: false }));
        assert!(matches!(scenario.steps[1], Step::DeleteSelected));
    }

    #[test]
    fn unknown_action_is_rejected() {
        let result: Result<Scenario, _> =
            serde_json::from_str(r#"{ "steps": [ { "action": "explode" } ] }"#);
        assert!(result.is_err());
    }
}
