/// BackupCoordinator: turns a fresh upload into a record with replicas.
///
/// Hash, create-or-get, then duplicate into every configured repository in
/// priority order. Replication is best-effort: a failing repository is
/// logged and skipped, and the upload still succeeds with whatever it got.
/// A record left without a live replica is surfaced as a single point of
/// failure.
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;

use crate::addresser::ContentAddresser;
use crate::config::BackupConfig;
use crate::error::BackupError;
use crate::events::{BackupEvent, EventSink};
use crate::platform::{bounded, Platform};
use crate::stats::BackupStats;
use crate::store::{LocationStore, NewRecord};
use crate::types::{now_ms, BackupRecord, ContentId, ContextId, LocationHandle};

/// One upload handed over by the intake.
pub struct Upload<R> {
    pub reader: R,
    /// Where the user's message landed.
    pub origin: LocationHandle,
    pub display_name: String,
    pub size_bytes: u64,
    pub mime_type: Option<String>,
    /// Identity computed upstream; skips hashing when set.
    pub content_id: Option<ContentId>,
}

impl<R> Upload<R> {
    pub fn new(
        reader: R,
        origin: LocationHandle,
        display_name: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            reader,
            origin,
            display_name: display_name.into(),
            size_bytes,
            mime_type: None,
            content_id: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_content_id(mut self, content_id: ContentId) -> Self {
        self.content_id = Some(content_id);
        self
    }
}

pub struct BackupCoordinator<S: ?Sized, P: ?Sized> {
    store: Arc<S>,
    platform: Arc<P>,
    addresser: ContentAddresser,
    repositories: Vec<ContextId>,
    platform_timeout: Duration,
    events: EventSink,
    stats: Arc<BackupStats>,
}

impl<S, P> BackupCoordinator<S, P>
where
    S: LocationStore + ?Sized,
    P: Platform + ?Sized,
{
    pub fn new(
        config: &BackupConfig,
        store: Arc<S>,
        platform: Arc<P>,
        events: EventSink,
        stats: Arc<BackupStats>,
    ) -> Self {
        Self {
            store,
            platform,
            addresser: ContentAddresser::with_chunking(
                config.hash_chunk_size,
                config.hash_yield_every,
            ),
            repositories: config.repositories.clone(),
            platform_timeout: config.platform_timeout,
            events,
            stats,
        }
    }

    /// Record an upload and replicate it. Returns the record after replication.
    ///
    /// Only hashing and store failures are errors; repository failures are not.
    pub async fn replicate<R>(&self, upload: Upload<R>) -> Result<BackupRecord, BackupError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let Upload {
            reader,
            origin,
            display_name,
            size_bytes,
            mime_type,
            content_id,
        } = upload;

        let content_id = match content_id {
            Some(id) => id,
            None => self.addresser.hash_reader(reader).await?,
        };

        let new = NewRecord {
            origin: origin.clone(),
            display_name,
            size_bytes,
            mime_type,
        };
        let (mut record, created) = self.store.create_or_get(content_id, new, now_ms()).await?;
        self.stats.upload();

        if created {
            tracing::info!(
                content_id = %content_id.short(),
                name = %record.display_name,
                "backup: new record"
            );
            self.events.emit(BackupEvent::RecordCreated { content_id });
        } else {
            tracing::debug!(
                content_id = %content_id.short(),
                replicas = record.replica_count(),
                "backup: content already known"
            );
        }

        if self.repositories.is_empty() {
            tracing::warn!(
                content_id = %content_id.short(),
                "backup: no repository configured, nothing replicated"
            );
            self.events.emit(BackupEvent::NoRepositoriesConfigured { content_id });
        }

        for &repository in &self.repositories {
            if record.has_live_location_in(repository) {
                continue;
            }
            record = self.replicate_into(record, &origin, repository).await?;
        }

        if record.live_replica_count() == 0 {
            tracing::warn!(
                content_id = %content_id.short(),
                "backup: no live replica, origin is a single point of failure"
            );
            self.events.emit(BackupEvent::SinglePointOfFailure { content_id });
        }

        Ok(record)
    }

    async fn replicate_into(
        &self,
        record: BackupRecord,
        upload_origin: &LocationHandle,
        repository: ContextId,
    ) -> Result<BackupRecord, BackupError> {
        let content_id = record.content_id;
        let source = copy_source(&record, upload_origin);
        let copied = bounded(
            self.platform_timeout,
            self.platform
                .forward(source.context_id, source.resource_ref, repository, None),
        )
        .await;

        match copied {
            Ok(location) => {
                let location_ref = location.location_ref();
                let record = self.store.append_replica(&content_id, location, now_ms()).await?;
                self.stats.replica_created();
                tracing::debug!(
                    content_id = %content_id.short(),
                    %repository,
                    "backup: replicated"
                );
                self.events.emit(BackupEvent::Replicated {
                    content_id,
                    repository,
                    location: location_ref,
                });
                Ok(record)
            }
            Err(e) => {
                self.stats.replication_failed();
                tracing::warn!(
                    content_id = %content_id.short(),
                    %repository,
                    "backup: replication failed: {e}"
                );
                self.events.emit(BackupEvent::ReplicationFailed {
                    content_id,
                    repository,
                    reason: e.to_string(),
                });
                Ok(record)
            }
        }
    }
}

/// Copy from the stored origin unless it is DEAD, then from this upload.
fn copy_source<'a>(
    record: &'a BackupRecord,
    upload_origin: &'a LocationHandle,
) -> &'a LocationHandle {
    if record.origin.health.is_dead() {
        upload_origin
    } else {
        &record.origin.location
    }
}
