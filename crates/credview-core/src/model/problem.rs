// ── Operator-facing problems ──
//
// Failures that never abort the view but leave state different from
// what the operator asked for.

use std::fmt;

use serde::Serialize;

use super::target::ConnectUrl;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Problem {
    /// A full refresh failed; the previous list was kept.
    FetchFailure { message: String },
    /// A single row's delete request failed.
    DeleteFailure { target: ConnectUrl, message: String },
    /// A delete was acknowledged but never confirmed by a notification.
    NotificationDeliveryLoss { target: ConnectUrl, waited_ms: u64 },
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FetchFailure { message } => {
                write!(f, "refresh of stored targets failed: {message}")
            }
            Self::DeleteFailure { target, message } => {
                write!(f, "deleting credentials for {target} failed: {message}")
            }
            Self::NotificationDeliveryLoss { target, waited_ms } => write!(
                f,
                "no deletion confirmation for {target} after {waited_ms}ms"
            ),
        }
    }
}
