use std::time::Duration;

use crate::types::*;

/// Environment variable listing repository contexts, comma-separated.
pub const REPOSITORIES_ENV: &str = "TOM_BACKUP_REPOSITORIES";

/// Configuration for a [`BackupService`](crate::BackupService).
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use std::time::Duration;
/// use tom_backup::{BackupConfig, ContextId};
///
/// let config = BackupConfig::new()
///     .repositories(vec![ContextId(-1001), ContextId(-1002)])
///     .platform_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Repositories replicas are forwarded into, highest priority first.
    pub(crate) repositories: Vec<ContextId>,
    /// Consecutive failures before a location is DEAD.
    pub(crate) failure_threshold: u32,
    /// How long a DEAD location is skipped before one retry probe.
    pub(crate) dead_cooldown: Duration,
    /// Bound on every platform call.
    pub(crate) platform_timeout: Duration,
    /// Validation age after which the sweeper probes a location.
    pub(crate) stale_after: Duration,
    /// Time between sweeper passes.
    pub(crate) sweep_interval: Duration,
    /// Records examined per sweeper pass.
    pub(crate) sweep_batch_size: usize,
    /// Delay between two sweeper probes.
    pub(crate) probe_spacing: Duration,
    pub(crate) hash_chunk_size: usize,
    pub(crate) hash_yield_every: usize,
    /// Capacity of the event channel.
    pub(crate) event_buffer: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BackupConfig {
    /// Create a new config with defaults.
    ///
    /// If `TOM_BACKUP_REPOSITORIES` is set (e.g. `-1001,-1002`), it seeds the
    /// repository list. This can be overridden with [`.repositories()`](Self::repositories).
    pub fn new() -> Self {
        let repositories = std::env::var(REPOSITORIES_ENV)
            .map(|s| parse_repositories(&s))
            .unwrap_or_default();

        Self {
            repositories,
            failure_threshold: FAILURE_THRESHOLD,
            dead_cooldown: Duration::from_millis(DEAD_COOLDOWN_MS),
            platform_timeout: Duration::from_millis(PLATFORM_TIMEOUT_MS),
            stale_after: Duration::from_millis(STALE_AFTER_MS),
            sweep_interval: Duration::from_millis(SWEEP_INTERVAL_MS),
            sweep_batch_size: SWEEP_BATCH_SIZE,
            probe_spacing: Duration::from_millis(PROBE_SPACING_MS),
            hash_chunk_size: HASH_CHUNK_SIZE,
            hash_yield_every: HASH_YIELD_EVERY,
            event_buffer: 4096,
        }
    }

    /// Set the repository list (priority order).
    pub fn repositories(mut self, repositories: Vec<ContextId>) -> Self {
        self.repositories = dedup(repositories);
        self
    }

    /// Set the failure threshold (minimum 1, default: 3).
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the DEAD cooldown (default: 10 minutes).
    pub fn dead_cooldown(mut self, cooldown: Duration) -> Self {
        self.dead_cooldown = cooldown;
        self
    }

    /// Set the per-call platform timeout (default: 15 s).
    pub fn platform_timeout(mut self, timeout: Duration) -> Self {
        self.platform_timeout = timeout;
        self
    }

    /// Set the staleness age for sweeper probes (default: 24 h).
    pub fn stale_after(mut self, age: Duration) -> Self {
        self.stale_after = age;
        self
    }

    /// Set the sweeper interval (default: 5 minutes).
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the records examined per sweep (minimum 1, default: 50).
    pub fn sweep_batch_size(mut self, size: usize) -> Self {
        self.sweep_batch_size = size.max(1);
        self
    }

    /// Set the delay between sweeper probes (default: 250 ms).
    pub fn probe_spacing(mut self, spacing: Duration) -> Self {
        self.probe_spacing = spacing;
        self
    }

    /// Set hashing chunk size and yield cadence.
    pub fn hash_chunking(mut self, chunk_size: usize, yield_every: usize) -> Self {
        self.hash_chunk_size = chunk_size.max(1);
        self.hash_yield_every = yield_every.max(1);
        self
    }

    /// Set the event channel capacity (default: 4096).
    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    pub fn repository_list(&self) -> &[ContextId] {
        &self.repositories
    }

    pub fn failure_threshold_value(&self) -> u32 {
        self.failure_threshold
    }

    pub(crate) fn dead_cooldown_ms(&self) -> u64 {
        self.dead_cooldown.as_millis() as u64
    }

    pub(crate) fn stale_after_ms(&self) -> u64 {
        self.stale_after.as_millis() as u64
    }
}

/// Parse `"-1001, -1002"` into context ids. Invalid entries are skipped.
pub fn parse_repositories(raw: &str) -> Vec<ContextId> {
    let parsed = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<i64>() {
            Ok(id) => Some(ContextId(id)),
            Err(e) => {
                tracing::warn!(entry = s, "ignoring invalid repository id: {e}");
                None
            }
        })
        .collect();
    dedup(parsed)
}

fn dedup(ids: Vec<ContextId>) -> Vec<ContextId> {
    let mut out: Vec<ContextId> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}
