// ── Ordered stored-target collection ──
//
// Insertion-ordered storage keyed by connect URL, with push-based
// change notification via a `watch` channel. Owned by the view loop,
// so mutation takes `&mut self` and needs no locking.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::model::{ConnectUrl, Target};

/// Point-in-time view of the stored-target list handed to subscribers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoredTargetsSnapshot {
    /// Bumped on every mutation of the list.
    pub version: u64,
    pub targets: Vec<Arc<Target>>,
}

impl StoredTargetsSnapshot {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn connect_urls(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.connect_url.as_str()).collect()
    }
}

/// The authoritative, ordered list of targets with stored credentials.
///
/// No two entries ever share a connect URL.
pub struct StoredTargets {
    entries: IndexMap<ConnectUrl, Arc<Target>>,
    version: u64,
    snapshot: watch::Sender<Arc<StoredTargetsSnapshot>>,
}

impl StoredTargets {
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(StoredTargetsSnapshot::default()));
        Self {
            entries: IndexMap::new(),
            version: 0,
            snapshot,
        }
    }

    /// Append `target` unless its key is already present. Returns `true`
    /// if the list grew.
    pub(crate) fn append_if_absent(&mut self, target: Target) -> bool {
        if self.entries.contains_key(&target.connect_url) {
            return false;
        }
        self.entries
            .insert(target.connect_url.clone(), Arc::new(target));
        self.publish();
        true
    }

    /// Remove the entry for `url`, keeping the order of the rest.
    pub(crate) fn remove(&mut self, url: &ConnectUrl) -> Option<Arc<Target>> {
        let removed = self.entries.shift_remove(url);
        if removed.is_some() {
            self.publish();
        }
        removed
    }

    /// Replace the whole list. Later duplicates of a key are dropped.
    pub(crate) fn replace_all(&mut self, targets: Vec<Target>) {
        let incoming = targets.len();
        let mut entries = IndexMap::with_capacity(incoming);
        for target in targets {
            entries
                .entry(target.connect_url.clone())
                .or_insert_with(|| Arc::new(target));
        }
        if entries.len() != incoming {
            debug!(
                incoming,
                kept = entries.len(),
                "dropped duplicate targets from refresh"
            );
        }
        self.entries = entries;
        self.publish();
    }

    pub fn get(&self, url: &ConnectUrl) -> Option<&Arc<Target>> {
        self.entries.get(url)
    }

    pub fn get_index(&self, index: usize) -> Option<&Arc<Target>> {
        self.entries.get_index(index).map(|(_, t)| t)
    }

    pub fn index_of(&self, url: &ConnectUrl) -> Option<usize> {
        self.entries.get_index_of(url)
    }

    pub fn contains(&self, url: &ConnectUrl) -> bool {
        self.entries.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Targets in list order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Target>> {
        self.entries.values()
    }

    pub fn snapshot(&self) -> Arc<StoredTargetsSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<StoredTargetsSnapshot>> {
        self.snapshot.subscribe()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn publish(&mut self) {
        self.version += 1;
        let snap = StoredTargetsSnapshot {
            version: self.version,
            targets: self.entries.values().cloned().collect(),
        };
        // `send_replace` updates unconditionally, even with zero receivers.
        self.snapshot.send_replace(Arc::new(snap));
    }
}
