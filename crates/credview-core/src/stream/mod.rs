// ── Reactive stored-target stream ──
//
// Subscription type for consuming stored-target list changes.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::store::StoredTargetsSnapshot;

/// A subscription to the stored-target list.
///
/// Provides both point-in-time snapshot access and reactive change
/// notification via [`changed`](Self::changed) or by converting to a
/// `Stream`.
pub struct StoredTargetStream {
    current: Arc<StoredTargetsSnapshot>,
    receiver: watch::Receiver<Arc<StoredTargetsSnapshot>>,
}

impl StoredTargetStream {
    pub(crate) fn new(mut receiver: watch::Receiver<Arc<StoredTargetsSnapshot>>) -> Self {
        let current = receiver.borrow_and_update().clone();
        Self { current, receiver }
    }

    /// The snapshot captured at creation time or by the last `changed()`.
    pub fn current(&self) -> &Arc<StoredTargetsSnapshot> {
        &self.current
    }

    /// The latest snapshot, which may be newer than `current()`.
    pub fn latest(&self) -> Arc<StoredTargetsSnapshot> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new snapshot.
    /// Returns `None` once the view loop has stopped.
    pub async fn changed(&mut self) -> Option<Arc<StoredTargetsSnapshot>> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = Arc::clone(&snap);
        Some(snap)
    }

    /// Convert into a `Stream` that yields the current snapshot first,
    /// then one snapshot per change.
    pub fn into_stream(self) -> StoredTargetWatchStream {
        StoredTargetWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
pub struct StoredTargetWatchStream {
    inner: WatchStream<Arc<StoredTargetsSnapshot>>,
}

impl Stream for StoredTargetWatchStream {
    type Item = Arc<StoredTargetsSnapshot>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
