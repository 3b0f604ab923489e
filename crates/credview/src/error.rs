//! CLI error types with miette diagnostics.
//!
//! Maps core and config errors into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use credview_config::ConfigError;
use credview_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Scenario ─────────────────────────────────────────────────────
    #[error("Scenario file not found: {path}")]
    #[diagnostic(
        code(credview::scenario_not_found),
        help("Pass the path to a TOML or JSON scenario, e.g. demos/bulk-delete.toml")
    )]
    ScenarioNotFound { path: String },

    #[error("Could not parse scenario {path}")]
    #[diagnostic(
        code(credview::scenario_invalid),
        help("{reason}")
    )]
    ScenarioInvalid { path: String, reason: String },

    #[error("Step {index} ({action}) failed")]
    #[diagnostic(code(credview::step_failed))]
    Step {
        index: usize,
        action: String,
        #[source]
        source: CoreError,
    },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("View did not settle within {ms}ms")]
    #[diagnostic(
        code(credview::timeout),
        help("Increase the limit with --settle-timeout-ms.")
    )]
    Timeout { ms: u64 },

    #[error(transparent)]
    #[diagnostic(code(credview::core))]
    Core(#[from] CoreError),

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(credview::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(credview::config),
        help("Check the file printed by: credview config path")
    )]
    Config(#[from] ConfigError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render {format} output: {reason}")]
    #[diagnostic(code(credview::render))]
    Render { format: String, reason: String },
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ScenarioNotFound { .. } => exit_code::NOT_FOUND,
            Self::ScenarioInvalid { .. } | Self::Validation { .. } | Self::Config(_) => {
                exit_code::USAGE
            }
            Self::Step { source, .. } | Self::Core(source) => match source {
                CoreError::RowOutOfRange { .. }
                | CoreError::TargetNotFound { .. }
                | CoreError::Config { .. } => exit_code::USAGE,
                _ => exit_code::GENERAL,
            },
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Io(_) | Self::Render { .. } => exit_code::GENERAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_errors_are_usage_errors() {
        let err = CliError::Step {
            index: 3,
            action: "check-row".into(),
            source: CoreError::RowOutOfRange { index: 9, len: 2 },
        };
        assert_eq!(err.exit_code(), exit_code::USAGE);
        assert_eq!(err.to_string(), "Step 3 (check-row) failed");
    }

    #[test]
    fn missing_scenario_is_not_found() {
        let err = CliError::ScenarioNotFound {
            path: "nope.toml".into(),
        };
        assert_eq!(err.exit_code(), exit_code::NOT_FOUND);
    }
}
