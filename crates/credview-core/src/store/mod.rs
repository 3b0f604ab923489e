// ── Reactive stored-target store ──
//
// The ordered stored-target list and the engine that reconciles full
// refreshes with push notifications into it.

mod reconcile;
mod stored_targets;

pub use reconcile::{ReconciliationEngine, RefreshOutcome, RefreshTicket, StoredOutcome};
pub use stored_targets::{StoredTargets, StoredTargetsSnapshot};
