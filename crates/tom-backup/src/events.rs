/// Events emitted by the backup layer for the operational collaborator.
///
/// Delivery is `try_send` on a bounded channel: emitting never blocks a
/// resolution. Alerts are additionally logged at error level, so a full or
/// closed channel can't hide them.
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::store::StatusUpdate;
use crate::types::{ContentId, ContextId, LocationRef, LocationStatus};

/// Who raised an unrecoverable alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSource {
    Resolver,
    Sweeper,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupEvent {
    /// First upload of new content.
    RecordCreated { content_id: ContentId },

    /// A repository now holds a copy.
    Replicated {
        content_id: ContentId,
        repository: ContextId,
        location: LocationRef,
    },

    /// Duplicating into a repository failed (upload still succeeded).
    ReplicationFailed {
        content_id: ContentId,
        repository: ContextId,
        reason: String,
    },

    /// No live replica: the origin is the only path back to the bytes.
    SinglePointOfFailure { content_id: ContentId },

    /// Replication skipped because no repository is configured.
    NoRepositoriesConfigured { content_id: ContentId },

    /// A location moved to SUSPECT or DEAD.
    LocationDemoted {
        content_id: ContentId,
        location: LocationRef,
        status: LocationStatus,
        failure_count: u32,
    },

    /// A SUSPECT/DEAD location served the object again.
    LocationRecovered {
        content_id: ContentId,
        location: LocationRef,
    },

    /// Every location is DEAD (alertUnrecoverable).
    Unrecoverable {
        content_id: ContentId,
        source: AlertSource,
    },
}

/// What a status write did to a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Demoted,
    Recovered,
    Unchanged,
}

/// Sending half shared by coordinator, resolver and sweeper.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<BackupEvent>>,
}

/// Create a sink and its receiver.
pub fn channel(capacity: usize) -> (EventSink, mpsc::Receiver<BackupEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSink { tx: Some(tx) }, rx)
}

impl EventSink {
    /// A sink that only logs.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: BackupEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(?event, "backup event channel full, event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("backup event receiver closed");
            }
        }
    }

    /// Raise the unrecoverable alert for `content_id`.
    pub fn alert_unrecoverable(&self, content_id: ContentId, source: AlertSource) {
        tracing::error!(
            content_id = %content_id.short(),
            ?source,
            "object unrecoverable: every location is dead"
        );
        self.emit(BackupEvent::Unrecoverable { content_id, source });
    }

    /// Report a status change caused by `update`, if any.
    pub(crate) fn location_update(
        &self,
        location: &LocationRef,
        update: &StatusUpdate,
    ) -> Transition {
        let Some(current) = update.current(location) else {
            return Transition::Unchanged;
        };
        if !update.applied || current == update.previous {
            return Transition::Unchanged;
        }
        let content_id = update.record.content_id;

        if current == LocationStatus::Active {
            tracing::info!(
                content_id = %content_id.short(),
                %location,
                previous = %update.previous,
                "backup: location recovered"
            );
            self.emit(BackupEvent::LocationRecovered {
                content_id,
                location: location.clone(),
            });
            return Transition::Recovered;
        }

        let failure_count = update
            .record
            .location(location)
            .map(|e| e.health.failure_count)
            .unwrap_or_default();
        if current == LocationStatus::Dead {
            tracing::warn!(
                content_id = %content_id.short(),
                %location,
                failure_count,
                "backup: location is DEAD"
            );
        } else {
            tracing::debug!(
                content_id = %content_id.short(),
                %location,
                failure_count,
                "backup: location is SUSPECT"
            );
        }
        self.emit(BackupEvent::LocationDemoted {
            content_id,
            location: location.clone(),
            status: current,
            failure_count,
        });
        Transition::Demoted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_reaches_receiver() {
        let (sink, mut rx) = channel(4);
        let id = ContentId::from_bytes([1; 32]);
        sink.emit(BackupEvent::RecordCreated { content_id: id });
        sink.alert_unrecoverable(id, AlertSource::Resolver);

        assert_eq!(rx.recv().await, Some(BackupEvent::RecordCreated { content_id: id }));
        assert_eq!(
            rx.recv().await,
            Some(BackupEvent::Unrecoverable {
                content_id: id,
                source: AlertSource::Resolver
            })
        );
    }

    #[tokio::test]
    async fn full_channel_does_not_block() {
        let (sink, mut rx) = channel(1);
        let id = ContentId::from_bytes([2; 32]);
        sink.emit(BackupEvent::SinglePointOfFailure { content_id: id });
        sink.emit(BackupEvent::SinglePointOfFailure { content_id: id }); // dropped
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn location_update_reports_transitions() {
        use crate::types::{BackupRecord, ContextId, FailureKind, LocationHandle, Observation};

        let (sink, mut rx) = channel(8);
        let id = ContentId::from_bytes([4; 32]);
        let origin = LocationRef::new("o");
        let mut record = BackupRecord::new(
            id,
            LocationHandle::new("h", ContextId(1), 1, "o"),
            "f".into(),
            1,
            None,
            0,
        );

        record.observe(&origin, Observation::Failed(FailureKind::Transient), 1, 3);
        let demoted = StatusUpdate {
            record: record.clone(),
            previous: LocationStatus::Active,
            applied: true,
        };
        assert_eq!(sink.location_update(&origin, &demoted), Transition::Demoted);

        // Same status again: nothing to report
        let again = StatusUpdate {
            previous: LocationStatus::Suspect,
            ..demoted.clone()
        };
        assert_eq!(sink.location_update(&origin, &again), Transition::Unchanged);

        record.observe(&origin, Observation::Alive { handle_expired: false }, 2, 3);
        let recovered = StatusUpdate {
            record,
            previous: LocationStatus::Suspect,
            applied: true,
        };
        assert_eq!(sink.location_update(&origin, &recovered), Transition::Recovered);

        assert!(matches!(
            rx.recv().await,
            Some(BackupEvent::LocationDemoted {
                status: LocationStatus::Suspect,
                failure_count: 1,
                ..
            })
        ));
        assert!(matches!(rx.recv().await, Some(BackupEvent::LocationRecovered { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disabled_sink_is_noop() {
        let sink = EventSink::disabled();
        sink.alert_unrecoverable(ContentId::from_bytes([3; 32]), AlertSource::Sweeper);
    }
}
