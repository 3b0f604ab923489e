// ── Per-row lifecycle ──

use serde::Serialize;

/// Why a row's deletion did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum DeleteFailure {
    /// The credential store rejected the delete request.
    Rejected(String),
    /// The store acknowledged the delete but no `CredentialsDeleted`
    /// notification arrived in time.
    ConfirmationTimeout,
}

/// Lifecycle of a single row in the view.
///
/// `Selected` is the only state that counts as "checked".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RowState {
    #[default]
    Idle,
    Selected,
    /// Delete request for this row is in flight.
    PendingDelete { batch: u64 },
    /// Store acknowledged the delete; awaiting the confirming notification.
    Deleted { batch: u64 },
    DeleteFailed { reason: DeleteFailure },
}

impl RowState {
    pub fn is_selected(&self) -> bool {
        matches!(self, Self::Selected)
    }

    /// A delete request or its confirmation is outstanding.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::PendingDelete { .. } | Self::Deleted { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Selected => "selected",
            Self::PendingDelete { .. } => "pending-delete",
            Self::Deleted { .. } => "deleted",
            Self::DeleteFailed { .. } => "delete-failed",
        }
    }
}
