/// DeliveryResolver: gets an object to a user through whichever path still works.
///
/// Candidates are tried in a fixed plan: origin, then replicas in stored
/// priority. DEAD locations inside their cooldown are skipped; DEAD locations
/// past it get exactly one platform call. Each tried candidate leaves one
/// observation in the store. When the plan runs dry the resolution ends in
/// `Unrecoverable` and raises one alert.
use std::sync::Arc;
use std::time::Duration;

use crate::config::BackupConfig;
use crate::error::{BackupError, PlatformError};
use crate::events::{AlertSource, EventSink};
use crate::platform::{bounded, Platform};
use crate::stats::BackupStats;
use crate::store::LocationStore;
use crate::types::{
    now_ms, BackupRecord, ContentId, ContextId, DeliveryOutcome, FailureKind, LocationEntry,
    LocationHandle, LocationRef, Observation,
};

/// One step of a resolution plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub entry: LocationEntry,
    /// DEAD past cooldown: a single platform call, no fallback.
    pub retry_probe: bool,
}

/// Order in which a resolution tries the record's locations.
pub fn plan_candidates(record: &BackupRecord, now: u64, cooldown_ms: u64) -> Vec<Candidate> {
    record
        .locations()
        .filter(|e| !e.health.is_cooling_down(now, cooldown_ms))
        .map(|e| Candidate {
            entry: e.clone(),
            retry_probe: e.health.is_dead(),
        })
        .collect()
}

/// What one candidate produced. `Err(None)` means the platform could not
/// act on it at all, which says nothing about the location.
type AttemptResult = Result<(LocationHandle, bool), Option<FailureKind>>;

pub struct DeliveryResolver<S: ?Sized, P: ?Sized> {
    store: Arc<S>,
    platform: Arc<P>,
    failure_threshold: u32,
    dead_cooldown_ms: u64,
    platform_timeout: Duration,
    events: EventSink,
    stats: Arc<BackupStats>,
}

impl<S, P> DeliveryResolver<S, P>
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
            failure_threshold: config.failure_threshold,
            dead_cooldown_ms: config.dead_cooldown_ms(),
            platform_timeout: config.platform_timeout,
            events,
            stats,
        }
    }

    /// Deliver `content_id` into `destination`.
    ///
    /// Only a failing store read is an `Err`; every platform outcome maps to
    /// a [`DeliveryOutcome`].
    pub async fn resolve(
        &self,
        content_id: &ContentId,
        destination: ContextId,
        caption: Option<&str>,
    ) -> Result<DeliveryOutcome, BackupError> {
        let record = match self.store.get(content_id).await {
            Ok(record) => record,
            Err(BackupError::NotFound(_)) => {
                tracing::debug!(content_id = %content_id.short(), "resolve: no record");
                return Ok(DeliveryOutcome::NotFound);
            }
            Err(e) => return Err(e),
        };

        let origin = record.origin.location_ref();
        let plan = plan_candidates(&record, now_ms(), self.dead_cooldown_ms);
        for candidate in &plan {
            let location_ref = candidate.entry.location_ref();
            let result = self.attempt(candidate, destination, caption).await;

            match result {
                Ok((handle, handle_expired)) => {
                    self.observe(content_id, &location_ref, Observation::Alive { handle_expired })
                        .await;
                    let fallback = location_ref != origin;
                    self.stats.delivered(fallback);
                    if fallback {
                        tracing::info!(
                            content_id = %content_id.short(),
                            via = %location_ref,
                            "resolve: delivered from replica"
                        );
                    }
                    return Ok(DeliveryOutcome::Delivered {
                        handle,
                        via: location_ref,
                    });
                }
                Err(Some(kind)) => {
                    self.stats.attempt_failed();
                    self.observe(content_id, &location_ref, Observation::Failed(kind))
                        .await;
                }
                Err(None) => {
                    tracing::debug!(
                        content_id = %content_id.short(),
                        location = %location_ref,
                        "resolve: platform cannot deliver from this location"
                    );
                }
            }
        }

        self.stats.unrecoverable();
        self.events
            .alert_unrecoverable(*content_id, AlertSource::Resolver);
        Ok(DeliveryOutcome::Unrecoverable)
    }

    /// Try one candidate: resend through its handle, then forward from its
    /// context. A retry probe stops after its first real call.
    async fn attempt(
        &self,
        candidate: &Candidate,
        destination: ContextId,
        caption: Option<&str>,
    ) -> AttemptResult {
        let location = &candidate.entry.location;
        let mut handle_expired = candidate.entry.health.handle_expired;
        let mut resend_failure = None;

        if !handle_expired {
            let resent = bounded(
                self.platform_timeout,
                self.platform.resend(location, destination, caption),
            )
            .await;
            match resent {
                Ok(handle) => return Ok((handle, false)),
                Err(PlatformError::Unsupported) => {}
                Err(e) => {
                    tracing::debug!(
                        location = %location.unique_resource_id,
                        "resolve: resend failed: {e}"
                    );
                    let kind = e.failure_kind();
                    if kind == Some(FailureKind::HandleExpired) {
                        handle_expired = true;
                    }
                    if candidate.retry_probe {
                        return Err(kind);
                    }
                    resend_failure = kind;
                }
            }
        }

        let forwarded = bounded(
            self.platform_timeout,
            self.platform
                .forward(location.context_id, location.resource_ref, destination, caption),
        )
        .await;
        match forwarded {
            Ok(handle) => Ok((handle, handle_expired)),
            // An expired handle with no forward path is a dead end, not a no-op
            Err(PlatformError::Unsupported) if handle_expired => {
                Err(Some(FailureKind::HandleExpired))
            }
            Err(PlatformError::Unsupported) => Err(resend_failure),
            Err(e) => {
                tracing::debug!(
                    location = %location.unique_resource_id,
                    "resolve: forward failed: {e}"
                );
                if handle_expired {
                    Err(Some(FailureKind::HandleExpired))
                } else {
                    Err(e.failure_kind())
                }
            }
        }
    }

    /// Write one observation. A failed write is logged; it never changes the outcome.
    async fn observe(
        &self,
        content_id: &ContentId,
        location_ref: &LocationRef,
        observation: Observation,
    ) {
        let written = self
            .store
            .mark_location_status(
                content_id,
                location_ref,
                observation,
                now_ms(),
                self.failure_threshold,
            )
            .await;
        match written {
            Ok(update) => {
                if !update.applied {
                    self.stats.stale_observation();
                }
                self.events.location_update(location_ref, &update);
            }
            Err(e) => {
                tracing::warn!(
                    content_id = %content_id.short(),
                    location = %location_ref,
                    "resolve: status write failed: {e}"
                );
            }
        }
    }
}
