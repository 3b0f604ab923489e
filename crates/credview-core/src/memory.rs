// ── In-memory collaborators ──
//
// Channel-backed implementations of every backend trait. They drive the
// integration tests and the CLI's scenario replay.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future;
use futures_util::stream::{BoxStream, StreamExt};
use indexmap::IndexMap;
use tokio::sync::{RwLock, broadcast, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tracing::{debug, warn};

use crate::backend::{CredentialStore, LocalCredentialCache, NotificationBus, TargetRegistry};
use crate::error::CoreError;
use crate::model::{ConnectUrl, NotificationCategory, NotificationEvent, Target};

// ===== WatchTargetRegistry =====

/// Registry whose snapshots are published by hand.
pub struct WatchTargetRegistry {
    targets: watch::Sender<Vec<Target>>,
}

impl WatchTargetRegistry {
    pub fn new(initial: Vec<Target>) -> Self {
        let (targets, _) = watch::channel(initial);
        Self { targets }
    }

    /// Replace the known targets; every subscriber sees the new snapshot.
    pub fn publish(&self, targets: Vec<Target>) {
        debug!(count = targets.len(), "registry snapshot published");
        self.targets.send_replace(targets);
    }

    pub fn current(&self) -> Vec<Target> {
        self.targets.borrow().clone()
    }
}

impl TargetRegistry for WatchTargetRegistry {
    fn subscribe(&self) -> BoxStream<'static, Vec<Target>> {
        WatchStream::new(self.targets.subscribe()).boxed()
    }
}

// ===== BroadcastNotificationBus =====

/// Notification bus fanning events out to every subscriber.
pub struct BroadcastNotificationBus {
    events: broadcast::Sender<NotificationEvent>,
}

impl BroadcastNotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self { events }
    }

    /// Deliver `event` to current subscribers. Returns how many.
    pub fn publish(&self, event: NotificationEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }
}

impl Default for BroadcastNotificationBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl NotificationBus for BroadcastNotificationBus {
    fn subscribe(&self, category: NotificationCategory) -> BoxStream<'static, NotificationEvent> {
        BroadcastStream::new(self.events.subscribe())
            .filter_map(move |item| {
                let event = match item {
                    Ok(event) if event.category() == category => Some(event),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(%category, skipped, "notification subscriber lagged");
                        None
                    }
                };
                future::ready(event)
            })
            .boxed()
    }
}

// ===== InMemoryCredentialStore =====

/// Credential store over an in-memory map.
///
/// When built with a bus it emits `CredentialsStored` on insert and
/// `CredentialsDeleted` on a successful delete, like a real backend.
pub struct InMemoryCredentialStore {
    targets: RwLock<IndexMap<ConnectUrl, Target>>,
    bus: Option<Arc<BroadcastNotificationBus>>,
    latency: Duration,
    /// Deletes for these keys fail.
    rejected: RwLock<HashSet<ConnectUrl>>,
    failing_fetches: AtomicUsize,
    /// Fetches wait while this is `false`.
    fetch_gate: watch::Sender<bool>,
    fetches: AtomicUsize,
    deletes: AtomicUsize,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        let (fetch_gate, _) = watch::channel(true);
        Self {
            targets: RwLock::new(IndexMap::new()),
            bus: None,
            latency: Duration::ZERO,
            rejected: RwLock::new(HashSet::new()),
            failing_fetches: AtomicUsize::new(0),
            fetch_gate,
            fetches: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn with_bus(mut self, bus: Arc<BroadcastNotificationBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Seed stored targets without emitting notifications.
    pub fn with_targets(self, targets: impl IntoIterator<Item = Target>) -> Self {
        let seeded = targets
            .into_iter()
            .map(|t| (t.connect_url.clone(), t))
            .collect();
        Self {
            targets: RwLock::new(seeded),
            ..self
        }
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Store credentials for `target`. Returns `false` if already stored.
    pub async fn insert(&self, target: Target) -> bool {
        let url = target.connect_url.clone();
        let inserted = {
            let mut targets = self.targets.write().await;
            if targets.contains_key(&url) {
                false
            } else {
                targets.insert(url.clone(), target);
                true
            }
        };
        if inserted {
            self.notify(NotificationEvent::stored(url));
        }
        inserted
    }

    pub async fn contains(&self, url: &ConnectUrl) -> bool {
        self.targets.read().await.contains_key(url)
    }

    pub async fn targets(&self) -> Vec<Target> {
        self.targets.read().await.values().cloned().collect()
    }

    pub async fn reject_deletes(&self, url: impl Into<ConnectUrl>) {
        self.rejected.write().await.insert(url.into());
    }

    pub async fn clear_rejections(&self) {
        self.rejected.write().await.clear();
    }

    /// Make the next `count` fetches fail.
    pub fn fail_next_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    /// Hold fetches after they have read the map, until
    /// [`resume_fetches`](Self::resume_fetches).
    pub fn pause_fetches(&self) {
        self.fetch_gate.send_replace(false);
    }

    pub fn resume_fetches(&self) {
        self.fetch_gate.send_replace(true);
    }

    /// Fetches that have read the map so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn notify(&self, event: NotificationEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl Default for InMemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn fetch_stored_targets(&self) -> Result<Vec<Target>, CoreError> {
        let snapshot = self.targets().await;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let mut gate = self.fetch_gate.subscribe();
        let opened = gate.wait_for(|open| *open).await.is_ok();
        if !opened {
            return Err(CoreError::Internal("fetch gate closed".into()));
        }
        self.simulate_latency().await;

        if failing {
            return Err(CoreError::FetchFailed {
                message: "injected fetch failure".into(),
            });
        }
        Ok(snapshot)
    }

    async fn delete_credentials(&self, target: &Target) -> Result<(), CoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let url = &target.connect_url;
        if self.rejected.read().await.contains(url) {
            return Err(CoreError::DeleteFailed {
                target: url.clone(),
                message: "rejected by store".into(),
            });
        }

        let removed = self.targets.write().await.shift_remove(url).is_some();
        if !removed {
            return Err(CoreError::DeleteFailed {
                target: url.clone(),
                message: "no credentials stored".into(),
            });
        }
        self.notify(NotificationEvent::deleted(url.clone()));
        Ok(())
    }
}

// ===== RecordingCredentialCache =====

/// Local cache that records every key it was told to forget.
#[derive(Default)]
pub struct RecordingCredentialCache {
    forgotten: Mutex<Vec<ConnectUrl>>,
}

impl RecordingCredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forgotten(&self) -> Vec<ConnectUrl> {
        self.forgotten
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LocalCredentialCache for RecordingCredentialCache {
    fn forget(&self, connect_url: &ConnectUrl) {
        self.forgotten
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(connect_url.clone());
    }
}
