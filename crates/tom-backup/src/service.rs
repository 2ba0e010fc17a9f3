/// BackupService: the one handle intake, catalog and operators talk to.
///
/// Wires a store and a platform into a coordinator, a resolver and an
/// optional background sweeper, all sharing one event channel and one set
/// of counters.
use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::BackupConfig;
use crate::coordinator::{BackupCoordinator, Upload};
use crate::error::BackupError;
use crate::events::{self, BackupEvent, EventSink};
use crate::platform::Platform;
use crate::resolver::DeliveryResolver;
use crate::stats::{BackupStats, StatsSnapshot};
use crate::store::LocationStore;
use crate::sweeper::HealthSweeper;
use crate::types::{BackupRecord, ContentId, ContextId, DeliveryOutcome};

pub struct BackupService<S: ?Sized, P: ?Sized> {
    config: BackupConfig,
    store: Arc<S>,
    platform: Arc<P>,
    coordinator: BackupCoordinator<S, P>,
    resolver: DeliveryResolver<S, P>,
    events: EventSink,
    stats: Arc<BackupStats>,
}

impl<S, P> BackupService<S, P>
where
    S: LocationStore + ?Sized + 'static,
    P: Platform + ?Sized + 'static,
{
    /// Build the service. The receiver carries every [`BackupEvent`],
    /// including unrecoverable alerts.
    pub fn new(
        config: BackupConfig,
        store: Arc<S>,
        platform: Arc<P>,
    ) -> (Self, mpsc::Receiver<BackupEvent>) {
        let (events, rx) = events::channel(config.event_buffer);
        let stats = Arc::new(BackupStats::new());

        if config.repositories.is_empty() {
            tracing::warn!(
                "backup: starting without any repository, uploads will not be replicated"
            );
        }

        let coordinator = BackupCoordinator::new(
            &config,
            store.clone(),
            platform.clone(),
            events.clone(),
            stats.clone(),
        );
        let resolver = DeliveryResolver::new(
            &config,
            store.clone(),
            platform.clone(),
            events.clone(),
            stats.clone(),
        );

        let service = Self {
            config,
            store,
            platform,
            coordinator,
            resolver,
            events,
            stats,
        };
        (service, rx)
    }

    /// Record an upload and replicate it into the configured repositories.
    pub async fn replicate<R>(&self, upload: Upload<R>) -> Result<BackupRecord, BackupError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.coordinator.replicate(upload).await
    }

    /// Deliver an object into `destination`, failing over between locations.
    pub async fn resolve(
        &self,
        content_id: &ContentId,
        destination: ContextId,
        caption: Option<&str>,
    ) -> Result<DeliveryOutcome, BackupError> {
        self.resolver.resolve(content_id, destination, caption).await
    }

    /// Current record for `content_id`.
    pub async fn record(&self, content_id: &ContentId) -> Result<BackupRecord, BackupError> {
        self.store.get(content_id).await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// A sweeper bound to this service; drive it with [`HealthSweeper::sweep_once`].
    pub fn sweeper(&self) -> HealthSweeper<S, P> {
        HealthSweeper::new(
            &self.config,
            self.store.clone(),
            self.platform.clone(),
            self.events.clone(),
            self.stats.clone(),
        )
    }

    /// Start the sweeper on the current tokio runtime.
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        let (shutdown, rx) = watch::channel(false);
        let join = tokio::spawn(self.sweeper().run(rx));
        SweeperHandle { shutdown, join }
    }
}

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper and wait for it to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            tracing::warn!("sweeper: task ended abnormally: {e}");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::MockPlatform;
    use crate::store::MemoryLocationStore;
    use crate::types::LocationHandle;
    use std::time::Duration;

    type TestService = BackupService<MemoryLocationStore, MockPlatform>;

    fn service(repositories: Vec<ContextId>) -> (TestService, mpsc::Receiver<BackupEvent>) {
        let config = BackupConfig::new().repositories(repositories);
        BackupService::new(
            config,
            Arc::new(MemoryLocationStore::new()),
            Arc::new(MockPlatform::new()),
        )
    }

    #[tokio::test]
    async fn upload_then_resolve() {
        let (svc, mut rx) = service(vec![ContextId(-1001)]);
        let origin = LocationHandle::new("file-1", ContextId(42), 3, "uniq-1");
        let record = svc
            .replicate(Upload::new(&b"bytes"[..], origin, "notes.txt", 5))
            .await
            .unwrap();
        assert_eq!(record.replica_count(), 1);

        let outcome = svc.resolve(&record.content_id, ContextId(9), Some("notes")).await.unwrap();
        assert!(outcome.is_delivered());

        let snap = svc.stats();
        assert_eq!(snap.uploads, 1);
        assert_eq!(snap.replicas_created, 1);
        assert_eq!(snap.deliveries, 1);
        assert!(matches!(rx.recv().await, Some(BackupEvent::RecordCreated { .. })));
        assert_eq!(svc.store().len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn record_lookup() {
        let (svc, _rx) = service(vec![]);
        let missing = ContentId::from_bytes([1; 32]);
        assert!(matches!(svc.record(&missing).await, Err(BackupError::NotFound(_))));
        assert!(svc.config().repository_list().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_handle_shuts_down() {
        let (svc, _rx) = service(vec![]);
        let handle = svc.spawn_sweeper();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!handle.is_finished());
        handle.shutdown().await;
    }
}
