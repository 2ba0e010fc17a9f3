//! ToM backup layer.
//!
//! Keeps platform-hosted objects retrievable when the platform only hands
//! out context-bound, expiring handles: content-addressed records, replicas
//! in backup repositories, failover between locations on delivery, and a
//! background health sweeper.
//!
//! Identity: SHA-256 of the bytes. Persistence: SQLite, records as MessagePack.

pub mod addresser;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod platform;
pub mod resolver;
pub mod service;
pub mod stats;
pub mod store;
pub mod sweeper;
pub mod types;

pub use addresser::{hash_bytes, ContentAddresser};
pub use config::{parse_repositories, BackupConfig, REPOSITORIES_ENV};
pub use coordinator::{BackupCoordinator, Upload};
pub use error::{BackupError, PlatformError};
pub use events::{AlertSource, BackupEvent, EventSink};
pub use platform::{Liveness, Platform};
pub use resolver::{plan_candidates, Candidate, DeliveryResolver};
pub use service::{BackupService, SweeperHandle};
pub use stats::{BackupStats, StatsSnapshot};
pub use store::{
    LocationStore, MemoryLocationStore, NewRecord, SqliteLocationStore, StatusUpdate,
};
pub use sweeper::{HealthSweeper, SweepReport};
pub use types::{
    now_ms, BackupRecord, ContentId, ContextId, DeliveryOutcome, FailureKind, LocationEntry,
    LocationHandle, LocationHealth, LocationRef, LocationStatus, Observation,
    UNAVAILABLE_MESSAGE,
};
