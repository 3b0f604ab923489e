// ── External collaborators ──
//
// The view never reaches for ambient services: every collaborator is
// handed in through `Backends`. Transports live behind these traits.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::CoreError;
use crate::model::{ConnectUrl, NotificationCategory, NotificationEvent, Target};

/// Source of "currently known targets" snapshots.
///
/// Each emission replaces the previous snapshot. The stream should yield
/// the current snapshot first, then every subsequent change.
pub trait TargetRegistry: Send + Sync {
    fn subscribe(&self) -> BoxStream<'static, Vec<Target>>;
}

/// Broadcast source of push notifications, filtered by category.
pub trait NotificationBus: Send + Sync {
    fn subscribe(&self, category: NotificationCategory) -> BoxStream<'static, NotificationEvent>;
}

/// Backend holding the stored credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// One-shot fetch of every target that has stored credentials.
    async fn fetch_stored_targets(&self) -> Result<Vec<Target>, CoreError>;

    /// One-shot delete of the credentials stored for `target`. No retry.
    async fn delete_credentials(&self, target: &Target) -> Result<(), CoreError>;
}

/// Local side channel told about deletions as soon as they are requested,
/// independent of the backend's answer.
pub trait LocalCredentialCache: Send + Sync {
    fn forget(&self, connect_url: &ConnectUrl);
}

/// A cache that ignores every signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCredentialCache;

impl LocalCredentialCache for NoopCredentialCache {
    fn forget(&self, _connect_url: &ConnectUrl) {}
}

/// Every collaborator a `CredentialsView` needs.
#[derive(Clone)]
pub struct Backends {
    pub registry: Arc<dyn TargetRegistry>,
    pub store: Arc<dyn CredentialStore>,
    pub bus: Arc<dyn NotificationBus>,
    pub cache: Arc<dyn LocalCredentialCache>,
}

impl Backends {
    pub fn new(
        registry: Arc<dyn TargetRegistry>,
        store: Arc<dyn CredentialStore>,
        bus: Arc<dyn NotificationBus>,
    ) -> Self {
        Self {
            registry,
            store,
            bus,
            cache: Arc::new(NoopCredentialCache),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn LocalCredentialCache>) -> Self {
        self.cache = cache;
        self
    }
}
