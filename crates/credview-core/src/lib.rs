// credview-core: Reconciliation engine behind a live view of targets with stored credentials.

pub mod backend;
pub mod bulk_delete;
pub mod command;
pub mod config;
pub mod error;
pub mod memory;
pub mod model;
pub mod selection;
pub mod store;
pub mod stream;
pub mod view;

// ── Primary re-exports ──────────────────────────────────────────────
pub use backend::{
    Backends, CredentialStore, LocalCredentialCache, NoopCredentialCache, NotificationBus,
    TargetRegistry,
};
pub use bulk_delete::{BulkDeleteCoordinator, BulkDeletePhase, BulkDeleteReport, FailedDelete};
pub use command::{ViewCommand, ViewCommandResult};
pub use config::ViewConfig;
pub use error::CoreError;
pub use selection::{RowEntry, SelectionModel, SelectionSnapshot};
pub use store::{ReconciliationEngine, RefreshTicket, StoredTargets, StoredTargetsSnapshot};
pub use stream::StoredTargetStream;
pub use view::{CredentialsView, ViewLifecycle};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    ConnectUrl, CredentialsMessage, DeleteFailure, NotificationCategory, NotificationEvent,
    Problem, RowState, Target,
};
