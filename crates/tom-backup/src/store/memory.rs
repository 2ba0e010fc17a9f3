use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use super::{apply_observation, LocationStore, NewRecord, StatusUpdate};
use crate::error::BackupError;
use crate::types::{BackupRecord, ContentId, LocationHandle, LocationRef, Observation};

/// In-process store. Each record sits behind its own mutex; the outer map
/// lock is only held to find or insert a record, never across a mutation.
#[derive(Default)]
pub struct MemoryLocationStore {
    records: RwLock<BTreeMap<ContentId, Arc<Mutex<BackupRecord>>>>,
}

impl MemoryLocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, id: &ContentId) -> Result<Arc<Mutex<BackupRecord>>, BackupError> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(BackupError::NotFound(*id))
    }
}

#[async_trait::async_trait]
impl LocationStore for MemoryLocationStore {
    async fn get(&self, id: &ContentId) -> Result<BackupRecord, BackupError> {
        let slot = self.slot(id).await?;
        let record = slot.lock().await;
        Ok(record.clone())
    }

    async fn create_or_get(
        &self,
        id: ContentId,
        new: NewRecord,
        at: u64,
    ) -> Result<(BackupRecord, bool), BackupError> {
        let (slot, created) = {
            let mut records = self.records.write().await;
            match records.get(&id) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let record = BackupRecord::new(
                        id,
                        new.origin,
                        new.display_name,
                        new.size_bytes,
                        new.mime_type,
                        at,
                    );
                    let slot = Arc::new(Mutex::new(record));
                    records.insert(id, slot.clone());
                    (slot, true)
                }
            }
        };
        let record = slot.lock().await.clone();
        Ok((record, created))
    }

    async fn append_replica(
        &self,
        id: &ContentId,
        location: LocationHandle,
        at: u64,
    ) -> Result<BackupRecord, BackupError> {
        let slot = self.slot(id).await?;
        let mut record = slot.lock().await;
        record.push_replica(location, at);
        Ok(record.clone())
    }

    async fn mark_location_status(
        &self,
        id: &ContentId,
        location_ref: &LocationRef,
        observation: Observation,
        at: u64,
        failure_threshold: u32,
    ) -> Result<StatusUpdate, BackupError> {
        let slot = self.slot(id).await?;
        let mut record = slot.lock().await;
        let (previous, applied) =
            apply_observation(&mut record, location_ref, observation, at, failure_threshold)?;
        Ok(StatusUpdate {
            record: record.clone(),
            previous,
            applied,
        })
    }

    async fn sweep_candidates(
        &self,
        stale_before: u64,
        after: Option<ContentId>,
        limit: usize,
    ) -> Result<Vec<ContentId>, BackupError> {
        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        let slots: Vec<(ContentId, Arc<Mutex<BackupRecord>>)> = self
            .records
            .read()
            .await
            .range((lower, Bound::Unbounded))
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();

        let mut out = Vec::new();
        for (id, slot) in slots {
            if out.len() >= limit {
                break;
            }
            if slot.lock().await.needs_sweep(stale_before) {
                out.push(id);
            }
        }
        Ok(out)
    }

    async fn len(&self) -> Result<usize, BackupError> {
        Ok(self.records.read().await.len())
    }
}
