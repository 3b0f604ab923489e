#![allow(clippy::unwrap_used)]
// End-to-end tests for `CredentialsView` over the in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use pretty_assertions::assert_eq;

use credview_core::memory::{
    BroadcastNotificationBus, InMemoryCredentialStore, RecordingCredentialCache,
    WatchTargetRegistry,
};
use credview_core::{
    Backends, ConnectUrl, CoreError, CredentialStore, CredentialsView, DeleteFailure,
    NotificationEvent, Problem, RowState, Target, ViewConfig, ViewLifecycle,
};

// ── Helpers ─────────────────────────────────────────────────────────

struct Harness {
    registry: Arc<WatchTargetRegistry>,
    bus: Arc<BroadcastNotificationBus>,
    store: Arc<InMemoryCredentialStore>,
    cache: Arc<RecordingCredentialCache>,
    view: CredentialsView,
}

fn target(url: &str, alias: &str) -> Target {
    Target::new(url, alias)
}

fn ab_registry() -> Vec<Target> {
    vec![target("a", "A"), target("b", "B")]
}

async fn start(registry: Vec<Target>, stored: Vec<Target>, config: ViewConfig) -> Harness {
    start_with(registry, config, |bus| {
        InMemoryCredentialStore::new()
            .with_bus(bus)
            .with_targets(stored)
    })
    .await
}

async fn start_with(
    registry: Vec<Target>,
    config: ViewConfig,
    build_store: impl FnOnce(Arc<BroadcastNotificationBus>) -> InMemoryCredentialStore,
) -> Harness {
    let registry = Arc::new(WatchTargetRegistry::new(registry));
    let bus = Arc::new(BroadcastNotificationBus::new(64));
    let store = Arc::new(build_store(Arc::clone(&bus)));
    let cache = Arc::new(RecordingCredentialCache::new());

    let backends = Backends::new(registry.clone(), store.clone(), bus.clone())
        .with_cache(cache.clone());
    let view = CredentialsView::new(config, backends).unwrap();
    view.activate().await.unwrap();

    let harness = Harness {
        registry,
        bus,
        store,
        cache,
        view,
    };
    harness.settle().await;
    harness
}

impl Harness {
    /// Wait until no refresh or delete is in flight and every queued
    /// input has been applied.
    async fn settle(&self) {
        self.view.flush().await.unwrap();
        let mut loading = self.view.loading();
        loading.wait_for(|l| !*l).await.unwrap();
        let mut phase = self.view.bulk_delete();
        phase.wait_for(|p| !p.is_requesting()).await.unwrap();
        self.view.flush().await.unwrap();
    }

    fn urls(&self) -> Vec<String> {
        self.view
            .stored_snapshot()
            .connect_urls()
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn selected(&self) -> Vec<usize> {
        self.view.selection_snapshot().selected_indices.clone()
    }

    async fn wait_for_fetches(&self, count: usize) {
        while self.store.fetch_count() < count {
            tokio::task::yield_now().await;
        }
    }
}

// ── Refresh and notification tests ──────────────────────────────────

#[tokio::test]
async fn refresh_then_stored_event_appends_registry_target() {
    let h = start(ab_registry(), vec![target("a", "")], ViewConfig::default()).await;
    assert_eq!(h.urls(), vec!["a"]);

    h.bus.publish(NotificationEvent::stored("b"));
    h.settle().await;

    assert_eq!(h.urls(), vec!["a", "b"]);
    let snap = h.view.stored_snapshot();
    assert_eq!(snap.targets[1].alias, "B");
}

#[tokio::test]
async fn duplicate_stored_event_yields_one_entry() {
    let h = start(ab_registry(), Vec::new(), ViewConfig::default()).await;

    h.bus.publish(NotificationEvent::stored("b"));
    h.bus.publish(NotificationEvent::stored("b"));
    h.settle().await;

    assert_eq!(h.urls(), vec!["b"]);
}

#[tokio::test]
async fn stored_event_for_unknown_target_is_dropped() {
    let h = start(ab_registry(), Vec::new(), ViewConfig::default()).await;

    h.bus.publish(NotificationEvent::stored("zzz"));
    h.settle().await;

    assert!(h.urls().is_empty());
}

#[tokio::test]
async fn registry_update_triggers_refresh() {
    let h = start(ab_registry(), vec![target("a", "")], ViewConfig::default()).await;
    let before = h.store.fetch_count();

    h.store.insert(target("b", "")).await;
    h.registry.publish(ab_registry());
    h.wait_for_fetches(before + 1).await;
    h.settle().await;

    assert_eq!(h.urls(), vec!["a", "b"]);
}

#[tokio::test]
async fn late_refresh_does_not_resurrect_deleted_target() {
    let h = start(ab_registry(), ab_registry(), ViewConfig::default()).await;
    let before = h.store.fetch_count();

    h.store.pause_fetches();
    h.view.refresh().await.unwrap();
    // The fetch has read [a, b] and is parked.
    h.wait_for_fetches(before + 1).await;

    h.store.delete_credentials(&target("a", "")).await.unwrap();
    h.view.flush().await.unwrap();
    assert_eq!(h.urls(), vec!["b"]);

    h.store.resume_fetches();
    h.settle().await;

    assert_eq!(h.urls(), vec!["b"]);
}

#[tokio::test]
async fn failed_refresh_keeps_list_and_clears_loading() {
    let h = start(ab_registry(), ab_registry(), ViewConfig::default()).await;
    let mut problems = h.view.problems();

    h.store.fail_next_fetches(1);
    h.view.refresh().await.unwrap();
    h.settle().await;

    assert!(!h.view.is_loading());
    assert_eq!(h.urls(), vec!["a", "b"]);
    assert!(matches!(
        problems.try_recv().unwrap(),
        Problem::FetchFailure { .. }
    ));
}

#[tokio::test]
async fn stored_target_stream_follows_push_events() {
    let h = start(ab_registry(), vec![target("a", "")], ViewConfig::default()).await;
    let mut stream = h.view.stored_targets();
    assert_eq!(stream.current().connect_urls(), vec!["a"]);

    h.bus.publish(NotificationEvent::stored("b"));
    let snap = stream.changed().await.unwrap();
    assert_eq!(snap.connect_urls(), vec!["a", "b"]);
    assert_eq!(stream.latest().version, snap.version);

    let mut updates = stream.into_stream();
    assert_eq!(updates.next().await.unwrap().connect_urls(), vec!["a", "b"]);

    h.bus.publish(NotificationEvent::deleted("a"));
    assert_eq!(updates.next().await.unwrap().connect_urls(), vec!["b"]);
}

// ── Selection tests ─────────────────────────────────────────────────

#[tokio::test]
async fn header_check_selects_all_then_none() {
    let h = start(ab_registry(), ab_registry(), ViewConfig::default()).await;

    h.view.check_header(true).await.unwrap();
    assert_eq!(h.selected(), vec![0, 1]);
    assert!(h.view.selection_snapshot().header_checked);

    h.view.check_row(0, false).await.unwrap();
    assert!(!h.view.selection_snapshot().header_checked);

    h.view.check_header(false).await.unwrap();
    assert!(h.selected().is_empty());
}

#[tokio::test]
async fn out_of_range_row_is_rejected() {
    let h = start(ab_registry(), ab_registry(), ViewConfig::default()).await;

    let err = h.view.check_row(2, true).await.unwrap_err();
    assert!(matches!(err, CoreError::RowOutOfRange { index: 2, len: 2 }));
}

#[tokio::test]
async fn deletion_mid_selection_revalidates_rows() {
    let h = start(ab_registry(), ab_registry(), ViewConfig::default()).await;
    h.view.check_header(true).await.unwrap();

    h.bus.publish(NotificationEvent::deleted("a"));
    h.settle().await;

    assert_eq!(h.urls(), vec!["b"]);
    assert_eq!(h.selected(), vec![0]);
    assert!(!h.view.selection_snapshot().header_checked);
}

#[tokio::test]
async fn same_length_refresh_with_new_keys_clears_header() {
    let registry = vec![
        target("a", "A"),
        target("b", "B"),
        target("c", "C"),
        target("d", "D"),
    ];
    // No bus: store mutations only reach the view through a refresh.
    let h = start_with(registry, ViewConfig::default(), |_| {
        InMemoryCredentialStore::new().with_targets(ab_registry())
    })
    .await;
    h.view.check_header(true).await.unwrap();
    assert!(h.view.selection_snapshot().header_checked);

    h.store.delete_credentials(&target("a", "")).await.unwrap();
    h.store.delete_credentials(&target("b", "")).await.unwrap();
    h.store.insert(target("c", "C")).await;
    h.store.insert(target("d", "D")).await;
    h.view.refresh().await.unwrap();
    h.settle().await;

    assert_eq!(h.urls(), vec!["c", "d"]);
    assert!(h.selected().is_empty());
    assert!(!h.view.selection_snapshot().header_checked);
}

// ── Bulk delete tests ───────────────────────────────────────────────

#[tokio::test]
async fn delete_selected_unchecks_then_removes_on_confirmation() {
    let h = start(ab_registry(), ab_registry(), ViewConfig::default()).await;
    h.view.check_row(1, true).await.unwrap();

    let batch = h.view.delete_selected().await.unwrap();
    assert!(batch.is_some());
    assert!(h.selected().is_empty());

    h.settle().await;

    assert_eq!(h.urls(), vec!["a"]);
    assert_eq!(h.cache.forgotten(), vec![ConnectUrl::from("b")]);
    assert!(h.view.selection_snapshot().rows.is_empty());
}

#[tokio::test]
async fn delete_with_nothing_selected_is_noop() {
    let h = start(ab_registry(), ab_registry(), ViewConfig::default()).await;

    assert_eq!(h.view.delete_selected().await.unwrap(), None);
    assert_eq!(h.store.delete_count(), 0);
}

#[tokio::test]
async fn rejected_delete_keeps_row_in_failed_state() {
    let h = start(ab_registry(), ab_registry(), ViewConfig::default()).await;
    let mut problems = h.view.problems();
    h.store.reject_deletes("b").await;

    h.view.check_header(true).await.unwrap();
    h.view.delete_selected().await.unwrap();
    h.settle().await;

    assert_eq!(h.urls(), vec!["b"]);
    assert!(matches!(
        h.view.selection_snapshot().state_of(&"b".into()),
        RowState::DeleteFailed {
            reason: DeleteFailure::Rejected(_)
        }
    ));
    assert!(matches!(
        problems.try_recv().unwrap(),
        Problem::DeleteFailure { .. }
    ));

    assert_eq!(h.view.retry_failed().await.unwrap(), 1);
    assert_eq!(h.selected(), vec![0]);

    h.store.clear_rejections().await;
    h.view.delete_selected().await.unwrap();
    h.settle().await;
    assert!(h.urls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn header_check_during_delete_sends_each_row_once() {
    let h = start_with(ab_registry(), ViewConfig::default(), |bus| {
        InMemoryCredentialStore::new()
            .with_bus(bus)
            .with_targets(ab_registry())
            .with_latency(Duration::from_millis(100))
    })
    .await;

    h.view.check_row(0, true).await.unwrap();
    h.view.delete_selected().await.unwrap();
    h.view.check_header(true).await.unwrap();
    assert!(matches!(
        h.view.selection_snapshot().state_of(&"a".into()),
        RowState::PendingDelete { .. }
    ));
    assert_eq!(h.selected(), vec![1]);

    h.view.delete_selected().await.unwrap();
    h.settle().await;

    assert_eq!(h.store.delete_count(), 2);
    assert!(h.urls().is_empty());
    assert_eq!(h.cache.forgotten().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_delete_times_out() {
    let config = ViewConfig {
        confirmation_timeout: Duration::from_millis(50),
        sweep_interval: Duration::from_millis(10),
        ..ViewConfig::default()
    };
    // No bus: the store acknowledges deletes but never confirms them.
    let h = start_with(ab_registry(), config, |_| {
        InMemoryCredentialStore::new().with_targets(ab_registry())
    })
    .await;
    let mut problems = h.view.problems();

    h.view.check_row(0, true).await.unwrap();
    h.view.delete_selected().await.unwrap();
    h.settle().await;
    assert!(matches!(
        h.view.selection_snapshot().state_of(&"a".into()),
        RowState::Deleted { .. }
    ));

    let problem = problems.recv().await.unwrap();
    assert!(matches!(
        problem,
        Problem::NotificationDeliveryLoss { ref target, .. } if target.as_str() == "a"
    ));
    assert_eq!(
        h.view.selection_snapshot().state_of(&"a".into()),
        RowState::DeleteFailed {
            reason: DeleteFailure::ConfirmationTimeout
        }
    );
    assert_eq!(h.urls(), vec!["a", "b"]);
}

// ── Lifecycle tests ─────────────────────────────────────────────────

#[tokio::test]
async fn activate_twice_is_rejected() {
    let h = start(ab_registry(), Vec::new(), ViewConfig::default()).await;
    let err = h.view.activate().await.unwrap_err();
    assert!(matches!(err, CoreError::AlreadyActivated));
}

#[tokio::test]
async fn no_state_change_after_deactivate() {
    let h = start(ab_registry(), ab_registry(), ViewConfig::default()).await;
    let before = h.store.fetch_count();

    h.store.pause_fetches();
    h.view.refresh().await.unwrap();
    h.wait_for_fetches(before + 1).await;

    h.view.deactivate().await;
    assert_eq!(*h.view.lifecycle().borrow(), ViewLifecycle::Inactive);
    assert!(!h.view.is_loading());

    let version = h.view.stored_snapshot().version;
    h.store.resume_fetches();
    h.bus.publish(NotificationEvent::deleted("a"));
    tokio::task::yield_now().await;

    assert_eq!(h.view.stored_snapshot().version, version);
    assert_eq!(h.urls(), vec!["a", "b"]);
    assert!(matches!(
        h.view.refresh().await.unwrap_err(),
        CoreError::ViewInactive
    ));
    assert!(matches!(
        h.view.activate().await.unwrap_err(),
        CoreError::ViewInactive
    ));
}
