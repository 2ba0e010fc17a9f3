/// LocationStore: the single owner of backup records.
///
/// Every mutation is an atomic read-modify-write of one record: the new
/// state is computed from the stored state inside the write, never from a
/// caller's snapshot. Status writes race by last-writer-wins on the
/// observation time, not on call order.
///
/// Two backends:
/// - **Memory**: per-record async mutex, unrelated records never contend
/// - **Sqlite**: one record per row, one IMMEDIATE transaction per mutation
pub mod memory;
pub mod sqlite;

pub use memory::MemoryLocationStore;
pub use sqlite::SqliteLocationStore;

use crate::error::BackupError;
use crate::types::{
    BackupRecord, ContentId, LocationHandle, LocationRef, LocationStatus, Observation,
};

/// Metadata for a record created on first upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub origin: LocationHandle,
    pub display_name: String,
    pub size_bytes: u64,
    pub mime_type: Option<String>,
}

/// Result of [`LocationStore::mark_location_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// Record after the write.
    pub record: BackupRecord,
    /// Status of the location before the write.
    pub previous: LocationStatus,
    /// `false` if the observation was older than the stored one and discarded.
    pub applied: bool,
}

impl StatusUpdate {
    /// Status of the location after the write.
    pub fn current(&self, location_ref: &LocationRef) -> Option<LocationStatus> {
        self.record.location(location_ref).map(|e| e.health.status)
    }
}

#[async_trait::async_trait]
pub trait LocationStore: Send + Sync {
    /// Snapshot of a record, or [`BackupError::NotFound`].
    async fn get(&self, id: &ContentId) -> Result<BackupRecord, BackupError>;

    /// Create the record if absent. An existing record is returned unchanged.
    ///
    /// The flag is `true` when this call created the record.
    async fn create_or_get(
        &self,
        id: ContentId,
        new: NewRecord,
        at: u64,
    ) -> Result<(BackupRecord, bool), BackupError>;

    /// Append a replica; a no-op if its `unique_resource_id` is already known.
    async fn append_replica(
        &self,
        id: &ContentId,
        location: LocationHandle,
        at: u64,
    ) -> Result<BackupRecord, BackupError>;

    /// Apply an observation to one location and derive its new status.
    async fn mark_location_status(
        &self,
        id: &ContentId,
        location_ref: &LocationRef,
        observation: Observation,
        at: u64,
        failure_threshold: u32,
    ) -> Result<StatusUpdate, BackupError>;

    /// Up to `limit` records after `after` (exclusive, in id order) that have
    /// a non-ACTIVE location or one validated before `stale_before`.
    async fn sweep_candidates(
        &self,
        stale_before: u64,
        after: Option<ContentId>,
        limit: usize,
    ) -> Result<Vec<ContentId>, BackupError>;

    /// Number of records.
    async fn len(&self) -> Result<usize, BackupError>;

    async fn is_empty(&self) -> Result<bool, BackupError> {
        Ok(self.len().await? == 0)
    }
}

/// Shared apply step for both backends.
pub(crate) fn apply_observation(
    record: &mut BackupRecord,
    location_ref: &LocationRef,
    observation: Observation,
    at: u64,
    failure_threshold: u32,
) -> Result<(LocationStatus, bool), BackupError> {
    let previous = record
        .location(location_ref)
        .map(|e| e.health.status)
        .ok_or_else(|| BackupError::UnknownLocation {
            content_id: record.content_id,
            location: location_ref.clone(),
        })?;
    let applied = record
        .observe(location_ref, observation, at, failure_threshold)
        .unwrap_or(false);
    Ok((previous, applied))
}
