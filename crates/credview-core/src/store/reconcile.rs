// ── Refresh / push reconciliation ──
//
// Merges pull-based full refreshes with push notifications into the
// stored-target list. Every mutation is stamped with a sequence number;
// pushes that land while a refresh is in flight are journaled and
// replayed over that refresh's result when it is applied.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::stored_targets::StoredTargets;
use crate::error::CoreError;
use crate::model::{ConnectUrl, Target};

/// Identifies one in-flight full refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTicket {
    /// Monotonic per engine; later tickets have larger ids.
    pub id: u64,
    /// Mutation sequence number at the time the fetch was issued.
    pub issued_at: u64,
}

/// What happened when a refresh result came back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The list was replaced; `len` rows after replay.
    Applied { len: usize },
    /// A later refresh was already applied; the result was discarded.
    Stale,
    /// The fetch failed; the previous list was kept.
    Failed { message: String },
}

/// Result of a `CredentialsStored` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredOutcome {
    Appended,
    AlreadyPresent,
    /// Key not in the registry snapshot; event dropped.
    Unregistered,
}

#[derive(Debug, Clone)]
enum PushChange {
    Stored(Target),
    Deleted(ConnectUrl),
}

#[derive(Debug, Clone)]
struct JournalEntry {
    seq: u64,
    change: PushChange,
}

/// Owner of the authoritative stored-target list.
pub struct ReconciliationEngine {
    stored: StoredTargets,
    registry: IndexMap<ConnectUrl, Target>,
    seq: u64,
    next_refresh_id: u64,
    applied_refresh_id: Option<u64>,
    in_flight: BTreeMap<u64, u64>,
    journal: Vec<JournalEntry>,
    loading: watch::Sender<bool>,
    sequenced: bool,
    accept_unregistered: bool,
}

impl ReconciliationEngine {
    pub fn new(sequenced: bool, accept_unregistered: bool) -> Self {
        let (loading, _) = watch::channel(false);
        Self {
            stored: StoredTargets::new(),
            registry: IndexMap::new(),
            seq: 0,
            next_refresh_id: 1,
            applied_refresh_id: None,
            in_flight: BTreeMap::new(),
            journal: Vec::new(),
            loading,
            sequenced,
            accept_unregistered,
        }
    }

    // ── Inputs ───────────────────────────────────────────────────────

    /// Start a full refresh. The caller performs the fetch and hands the
    /// result back through [`complete_refresh`](Self::complete_refresh).
    ///
    /// Refreshes are never coalesced; each call issues a new ticket.
    pub fn begin_refresh(&mut self) -> RefreshTicket {
        let ticket = RefreshTicket {
            id: self.next_refresh_id,
            issued_at: self.seq,
        };
        self.next_refresh_id += 1;
        self.in_flight.insert(ticket.id, ticket.issued_at);
        self.update_loading();
        debug!(id = ticket.id, issued_at = ticket.issued_at, "refresh issued");
        ticket
    }

    /// Record a new registry snapshot and start a refresh unconditionally.
    pub fn on_registry_update(&mut self, targets: Vec<Target>) -> RefreshTicket {
        self.registry = targets
            .into_iter()
            .map(|t| (t.connect_url.clone(), t))
            .collect();
        debug!(known = self.registry.len(), "registry snapshot updated");
        self.begin_refresh()
    }

    /// Fold a finished fetch into the list.
    pub fn complete_refresh(
        &mut self,
        ticket: RefreshTicket,
        result: Result<Vec<Target>, CoreError>,
    ) -> RefreshOutcome {
        self.in_flight.remove(&ticket.id);

        let outcome = match result {
            Err(e) => {
                warn!(id = ticket.id, error = %e, "refresh failed, keeping previous list");
                RefreshOutcome::Failed {
                    message: e.to_string(),
                }
            }
            Ok(_) if self.is_stale(ticket) => {
                debug!(id = ticket.id, "discarding stale refresh result");
                RefreshOutcome::Stale
            }
            Ok(fetched) => {
                let merged = if self.sequenced {
                    self.replay_since(fetched, ticket.issued_at)
                } else {
                    fetched
                };
                self.seq += 1;
                self.stored.replace_all(merged);
                self.applied_refresh_id = Some(
                    self.applied_refresh_id
                        .map_or(ticket.id, |applied| applied.max(ticket.id)),
                );
                debug!(id = ticket.id, len = self.stored.len(), "refresh applied");
                RefreshOutcome::Applied {
                    len: self.stored.len(),
                }
            }
        };

        self.prune_journal();
        // Observers see the new list before loading drops.
        self.update_loading();
        outcome
    }

    /// Apply a `CredentialsStored` notification.
    ///
    /// The target is looked up in the registry snapshot, not in the
    /// stored list; unknown keys are dropped unless configured otherwise.
    pub fn on_credentials_stored(&mut self, url: &ConnectUrl) -> StoredOutcome {
        let target = match self.registry.get(url) {
            Some(t) => t.clone(),
            None if self.accept_unregistered => Target::new(url.clone(), ""),
            None => {
                debug!(target = %url, "stored event for unknown target dropped");
                return StoredOutcome::Unregistered;
            }
        };

        self.seq += 1;
        self.journal_push(PushChange::Stored(target.clone()));

        if self.stored.append_if_absent(target) {
            StoredOutcome::Appended
        } else {
            StoredOutcome::AlreadyPresent
        }
    }

    /// Apply a `CredentialsDeleted` notification. Returns `true` if a row
    /// was removed.
    pub fn on_credentials_deleted(&mut self, url: &ConnectUrl) -> bool {
        self.seq += 1;
        self.journal_push(PushChange::Deleted(url.clone()));
        self.stored.remove(url).is_some()
    }

    /// Forget every refresh still in flight. Their results will never be
    /// applied, so loading drops back to `false`.
    pub fn abandon_refreshes(&mut self) {
        if self.in_flight.is_empty() {
            return;
        }
        debug!(abandoned = self.in_flight.len(), "dropping in-flight refreshes");
        self.in_flight.clear();
        self.journal.clear();
        self.update_loading();
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn stored(&self) -> &StoredTargets {
        &self.stored
    }

    pub fn is_loading(&self) -> bool {
        !self.in_flight.is_empty()
    }

    pub fn subscribe_loading(&self) -> watch::Receiver<bool> {
        self.loading.subscribe()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn is_stale(&self, ticket: RefreshTicket) -> bool {
        self.sequenced
            && self
                .applied_refresh_id
                .is_some_and(|applied| applied > ticket.id)
    }

    fn journal_push(&mut self, change: PushChange) {
        if self.sequenced && !self.in_flight.is_empty() {
            self.journal.push(JournalEntry {
                seq: self.seq,
                change,
            });
        }
    }

    /// Overlay every push mutation newer than `issued_at` on `fetched`.
    fn replay_since(&self, fetched: Vec<Target>, issued_at: u64) -> Vec<Target> {
        let mut merged: IndexMap<ConnectUrl, Target> = IndexMap::with_capacity(fetched.len());
        for target in fetched {
            merged.entry(target.connect_url.clone()).or_insert(target);
        }

        for entry in self.journal.iter().filter(|e| e.seq > issued_at) {
            match &entry.change {
                PushChange::Stored(target) => {
                    merged
                        .entry(target.connect_url.clone())
                        .or_insert_with(|| target.clone());
                }
                PushChange::Deleted(url) => {
                    if merged.shift_remove(url).is_some() {
                        debug!(target = %url, "suppressed resurrection of deleted target");
                    }
                }
            }
        }

        merged.into_values().collect()
    }

    /// Drop journal entries no in-flight refresh can still need.
    fn prune_journal(&mut self) {
        match self.in_flight.values().min().copied() {
            None => self.journal.clear(),
            Some(oldest) => self.journal.retain(|e| e.seq > oldest),
        }
    }

    fn update_loading(&self) {
        let loading = !self.in_flight.is_empty();
        self.loading.send_if_modified(|current| {
            if *current == loading {
                false
            } else {
                *current = loading;
                true
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn registry() -> Vec<Target> {
        vec![Target::new("a", "A"), Target::new("b", "B"), Target::new("c", "C")]
    }

    fn urls(engine: &ReconciliationEngine) -> Vec<String> {
        engine
            .stored()
            .iter()
            .map(|t| t.connect_url.to_string())
            .collect()
    }

    fn engine() -> ReconciliationEngine {
        ReconciliationEngine::new(true, false)
    }

    #[test]
    fn refresh_replaces_list_and_toggles_loading() {
        let mut e = engine();
        let ticket = e.on_registry_update(registry());
        assert!(e.is_loading());

        let outcome = e.complete_refresh(ticket, Ok(vec![Target::new("a", "A")]));
        assert_eq!(outcome, RefreshOutcome::Applied { len: 1 });
        assert!(!e.is_loading());
        assert_eq!(urls(&e), vec!["a"]);
    }

    #[test]
    fn failed_refresh_keeps_previous_list_and_clears_loading() {
        let mut e = engine();
        let t1 = e.on_registry_update(registry());
        e.complete_refresh(t1, Ok(vec![Target::new("a", "A")]));

        let t2 = e.begin_refresh();
        let outcome = e.complete_refresh(
            t2,
            Err(CoreError::FetchFailed {
                message: "boom".into(),
            }),
        );
        assert!(matches!(outcome, RefreshOutcome::Failed { .. }));
        assert!(!e.is_loading());
        assert_eq!(urls(&e), vec!["a"]);
    }

    #[test]
    fn stored_event_appends_registry_target_once() {
        let mut e = engine();
        e.on_registry_update(registry());
        assert_eq!(e.on_credentials_stored(&"b".into()), StoredOutcome::Appended);
        assert_eq!(
            e.on_credentials_stored(&"b".into()),
            StoredOutcome::AlreadyPresent
        );
        assert_eq!(urls(&e), vec!["b"]);
        assert_eq!(e.stored().get(&"b".into()).unwrap().alias, "B");
    }

    #[test]
    fn stored_event_for_unknown_target_is_dropped() {
        let mut e = engine();
        e.on_registry_update(registry());
        assert_eq!(
            e.on_credentials_stored(&"zzz".into()),
            StoredOutcome::Unregistered
        );
        assert!(e.stored().is_empty());
    }

    #[test]
    fn unregistered_targets_accepted_when_configured() {
        let mut e = ReconciliationEngine::new(true, true);
        assert_eq!(e.on_credentials_stored(&"zzz".into()), StoredOutcome::Appended);
        assert_eq!(e.stored().get(&"zzz".into()).unwrap().display_name(), "zzz");
    }

    #[test]
    fn deleted_event_is_noop_when_absent() {
        let mut e = engine();
        assert!(!e.on_credentials_deleted(&"a".into()));
        let t = e.on_registry_update(registry());
        e.complete_refresh(t, Ok(registry()));
        assert!(e.on_credentials_deleted(&"a".into()));
        assert_eq!(urls(&e), vec!["b", "c"]);
    }

    #[test]
    fn late_refresh_does_not_resurrect_deleted_row() {
        let mut e = engine();
        let t = e.on_registry_update(registry());
        e.complete_refresh(t, Ok(registry()));

        // Fetch issued while "a" still exists on the backend...
        let stale = e.begin_refresh();
        // ...then the delete is pushed before the fetch returns.
        e.on_credentials_deleted(&"a".into());
        e.complete_refresh(stale, Ok(registry()));

        assert_eq!(urls(&e), vec!["b", "c"]);
    }

    #[test]
    fn late_refresh_keeps_row_stored_after_issue() {
        let mut e = engine();
        let t = e.on_registry_update(registry());
        e.complete_refresh(t, Ok(vec![Target::new("a", "A")]));

        let stale = e.begin_refresh();
        e.on_credentials_stored(&"c".into());
        e.complete_refresh(stale, Ok(vec![Target::new("a", "A")]));

        assert_eq!(urls(&e), vec!["a", "c"]);
    }

    #[test]
    fn older_refresh_completing_last_is_discarded() {
        let mut e = engine();
        e.on_registry_update(registry());
        let older = e.begin_refresh();
        let newer = e.begin_refresh();

        e.complete_refresh(newer, Ok(vec![Target::new("b", "B")]));
        let outcome = e.complete_refresh(older, Ok(vec![Target::new("a", "A")]));

        assert_eq!(outcome, RefreshOutcome::Stale);
        assert_eq!(urls(&e), vec!["b"]);
    }

    #[test]
    fn unsequenced_mode_is_last_completed_wins() {
        let mut e = ReconciliationEngine::new(false, false);
        let t = e.on_registry_update(registry());
        e.complete_refresh(t, Ok(registry()));

        let older = e.begin_refresh();
        let newer = e.begin_refresh();
        e.on_credentials_deleted(&"a".into());
        e.complete_refresh(newer, Ok(vec![Target::new("b", "B")]));
        e.complete_refresh(older, Ok(registry()));

        assert_eq!(urls(&e), vec!["a", "b", "c"]);
    }

    #[test]
    fn journal_is_cleared_once_no_refresh_in_flight() {
        let mut e = engine();
        e.on_registry_update(registry());
        let t = e.begin_refresh();
        e.on_credentials_deleted(&"a".into());
        assert_eq!(e.journal.len(), 1);

        // The registry-triggered refresh is still in flight.
        e.complete_refresh(t, Ok(Vec::new()));
        assert_eq!(e.journal.len(), 1);

        let first = RefreshTicket {
            id: 1,
            issued_at: 0,
        };
        e.complete_refresh(first, Ok(Vec::new()));
        assert!(e.journal.is_empty());
    }

    #[test]
    fn abandoning_refreshes_clears_loading() {
        let mut e = engine();
        let loading = e.subscribe_loading();
        e.on_registry_update(registry());
        e.begin_refresh();
        assert!(*loading.borrow());

        e.abandon_refreshes();
        assert!(!e.is_loading());
        assert!(!*loading.borrow());
        assert!(e.journal.is_empty());
    }

    #[test]
    fn refresh_with_duplicate_keys_keeps_list_unique() {
        let mut e = engine();
        let t = e.begin_refresh();
        e.complete_refresh(
            t,
            Ok(vec![Target::new("a", ""), Target::new("a", ""), Target::new("b", "")]),
        );
        assert_eq!(urls(&e), vec!["a", "b"]);
    }
}
