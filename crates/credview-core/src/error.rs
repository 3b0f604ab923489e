// ── Core error types ──
//
// Errors surfaced by credview-core. Collaborator implementations map
// their transport failures into `FetchFailed` / `DeleteFailed`; the
// view itself never exposes transport details.

use thiserror::Error;

use crate::model::ConnectUrl;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Collaborator failures ────────────────────────────────────────
    #[error("Failed to fetch targets with stored credentials: {message}")]
    FetchFailed { message: String },

    #[error("Failed to delete credentials for {target}: {message}")]
    DeleteFailed { target: ConnectUrl, message: String },

    // ── Selection errors ─────────────────────────────────────────────
    #[error("Row {index} is out of range (list has {len} rows)")]
    RowOutOfRange { index: usize, len: usize },

    #[error("Target not found: {target}")]
    TargetNotFound { target: ConnectUrl },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("View is not active")]
    ViewInactive,

    #[error("View was already activated")]
    AlreadyActivated,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}
