/// HealthSweeper: background liveness probing.
///
/// Each pass takes one bounded batch of candidate records from the store,
/// resuming after the last record of the previous batch and wrapping around
/// at the end. Probes are spaced out and go through the same status writes
/// as user requests; a probe result older than a live write loses.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::BackupConfig;
use crate::error::BackupError;
use crate::events::{AlertSource, EventSink, Transition};
use crate::platform::{bounded, Liveness, Platform};
use crate::stats::BackupStats;
use crate::store::LocationStore;
use crate::types::{now_ms, ContentId, FailureKind, LocationEntry, LocationStatus, Observation};

/// Summary of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub records_examined: usize,
    pub probes: usize,
    pub demoted: usize,
    pub recovered: usize,
    /// Records this pass left with every location DEAD.
    pub unrecoverable: usize,
    /// The batch reached the end of the store; the next pass starts over.
    pub wrapped: bool,
}

pub struct HealthSweeper<S: ?Sized, P: ?Sized> {
    store: Arc<S>,
    platform: Arc<P>,
    interval: Duration,
    batch_size: usize,
    probe_spacing: Duration,
    stale_after_ms: u64,
    dead_cooldown_ms: u64,
    failure_threshold: u32,
    platform_timeout: Duration,
    events: EventSink,
    stats: Arc<BackupStats>,
    cursor: Option<ContentId>,
}

impl<S, P> HealthSweeper<S, P>
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
            interval: config.sweep_interval,
            batch_size: config.sweep_batch_size,
            probe_spacing: config.probe_spacing,
            stale_after_ms: config.stale_after_ms(),
            dead_cooldown_ms: config.dead_cooldown_ms(),
            failure_threshold: config.failure_threshold,
            platform_timeout: config.platform_timeout,
            events,
            stats,
            cursor: None,
        }
    }

    /// Run one pass as of `now`.
    pub async fn sweep_once(&mut self, now: u64) -> Result<SweepReport, BackupError> {
        let mut report = SweepReport::default();
        let stale_before = now.saturating_sub(self.stale_after_ms);
        let probing = self.platform.supports_probe();

        let batch = self
            .store
            .sweep_candidates(stale_before, self.cursor, self.batch_size)
            .await?;
        if batch.len() < self.batch_size {
            self.cursor = None;
            report.wrapped = true;
        } else {
            self.cursor = batch.last().copied();
        }

        for content_id in batch {
            let mut record = match self.store.get(&content_id).await {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(content_id = %content_id.short(), "sweeper: read failed: {e}");
                    continue;
                }
            };
            report.records_examined += 1;
            if !probing {
                continue;
            }

            let due: Vec<LocationEntry> = record
                .locations()
                .filter(|e| self.due_for_probe(e, stale_before, now))
                .cloned()
                .collect();

            let mut newly_dead = false;
            for entry in due {
                if report.probes > 0 && !self.probe_spacing.is_zero() {
                    tokio::time::sleep(self.probe_spacing).await;
                }
                report.probes += 1;
                self.stats.probed();

                let Some(observation) = self.probe(&entry).await else {
                    continue;
                };
                let location_ref = entry.location_ref();
                let written = self
                    .store
                    .mark_location_status(
                        &content_id,
                        &location_ref,
                        observation,
                        now,
                        self.failure_threshold,
                    )
                    .await;
                let update = match written {
                    Ok(update) => update,
                    Err(e) => {
                        tracing::warn!(
                            content_id = %content_id.short(),
                            location = %location_ref,
                            "sweeper: status write failed: {e}"
                        );
                        continue;
                    }
                };
                if !update.applied {
                    self.stats.stale_observation();
                }
                match self.events.location_update(&location_ref, &update) {
                    Transition::Demoted => {
                        report.demoted += 1;
                        if update.current(&location_ref) == Some(LocationStatus::Dead) {
                            newly_dead = true;
                        }
                    }
                    Transition::Recovered => report.recovered += 1,
                    Transition::Unchanged => {}
                }
                record = update.record;
            }

            // Only the pass that kills the last location alerts
            if newly_dead && record.is_unrecoverable() {
                report.unrecoverable += 1;
                self.stats.unrecoverable();
                self.events
                    .alert_unrecoverable(content_id, AlertSource::Sweeper);
            }
        }

        Ok(report)
    }

    /// Loop until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        result = self.sweep_once(now_ms()) => match result {
                            Ok(report) => tracing::debug!(
                                examined = report.records_examined,
                                probes = report.probes,
                                demoted = report.demoted,
                                recovered = report.recovered,
                                unrecoverable = report.unrecoverable,
                                "sweeper: pass done"
                            ),
                            Err(e) => tracing::warn!("sweeper: pass failed: {e}"),
                        },
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("sweeper: stopped");
    }

    fn due_for_probe(&self, entry: &LocationEntry, stale_before: u64, now: u64) -> bool {
        match entry.health.status {
            LocationStatus::Active => entry.health.last_validated_at < stale_before,
            LocationStatus::Suspect => true,
            LocationStatus::Dead => !entry.health.is_cooling_down(now, self.dead_cooldown_ms),
        }
    }

    /// `None` when the platform could not check this location.
    async fn probe(&self, entry: &LocationEntry) -> Option<Observation> {
        let probed = bounded(self.platform_timeout, self.platform.probe(&entry.location)).await;
        match probed {
            Ok(Liveness::Alive) => Some(Observation::Alive {
                handle_expired: entry.health.handle_expired,
            }),
            Ok(Liveness::Gone) => Some(Observation::Failed(FailureKind::ResourceGone)),
            Err(e) => {
                tracing::debug!(
                    location = %entry.location.unique_resource_id,
                    "sweeper: probe failed: {e}"
                );
                e.failure_kind().map(Observation::Failed)
            }
        }
    }
}
