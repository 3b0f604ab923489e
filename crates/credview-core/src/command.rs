// ── View command API ──
//
// Every user action flows through a unified `ViewCommand` enum. The view
// loop applies each one against the state it owns and answers through
// the envelope's oneshot channel.

use crate::error::CoreError;
use crate::model::ConnectUrl;
use crate::store::RefreshTicket;

/// A command envelope sent through the command channel.
/// Contains the command and a oneshot response channel.
pub(crate) struct CommandEnvelope {
    pub command: ViewCommand,
    pub response_tx: tokio::sync::oneshot::Sender<Result<ViewCommandResult, CoreError>>,
}

/// All user actions a `CredentialsView` accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewCommand {
    /// Issue a full refresh of the stored-target list.
    Refresh,

    // ── Selection ────────────────────────────────────────────────────
    CheckRow {
        index: usize,
        checked: bool,
    },
    CheckTarget {
        target: ConnectUrl,
        checked: bool,
    },
    CheckHeader {
        checked: bool,
    },

    // ── Bulk delete ──────────────────────────────────────────────────
    DeleteSelected,
    /// Re-select every row whose delete failed.
    RetryFailed,

    /// Resolves once every input queued ahead of it has been applied.
    Flush,
}

/// Result of a successfully applied command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewCommandResult {
    Ok,
    RefreshStarted { ticket: RefreshTicket },
    DeleteStarted { batch: u64, targets: Vec<ConnectUrl> },
    NothingSelected,
    Retried { count: usize },
}
