/// Backup types: content identities, platform locations, per-location health.
///
/// A record maps one content identity to every known path back to its bytes.
/// Platform handles are context-bound, so a location always carries the
/// context it lives in next to the handle and the forwardable resource ref.
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::BackupError;

// ── Constants ────────────────────────────────────────────────────────────

/// Consecutive failures after which a location is declared DEAD.
pub const FAILURE_THRESHOLD: u32 = 3;

/// A DEAD location is left alone for this long after its last validation (10 min).
pub const DEAD_COOLDOWN_MS: u64 = 10 * 60 * 1000;

/// Upper bound for a single platform call (15 seconds).
pub const PLATFORM_TIMEOUT_MS: u64 = 15_000;

/// Locations not validated for this long are probed by the sweeper (24h).
pub const STALE_AFTER_MS: u64 = 24 * 60 * 60 * 1000;

/// Sweep interval (5 minutes).
pub const SWEEP_INTERVAL_MS: u64 = 5 * 60 * 1000;

/// Maximum records examined per sweep pass.
pub const SWEEP_BATCH_SIZE: usize = 50;

/// Delay between two sweeper probes.
pub const PROBE_SPACING_MS: u64 = 250;

/// Read size for content hashing (64 KiB).
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Chunks hashed between two cooperative yields.
pub const HASH_YIELD_EVERY: usize = 16;

/// Current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Identities ───────────────────────────────────────────────────────────

/// SHA-256 of an object's bytes. The dedup key across every context.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentId([u8; 32]);

impl ContentId {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full 64-char lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 16 hex chars, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.short())
    }
}

impl FromStr for ContentId {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| BackupError::InvalidContentId(e.to_string()))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            BackupError::InvalidContentId(format!("expected 32 bytes, got {}", v.len()))
        })?;
        Ok(Self(bytes))
    }
}

/// A platform conversation (private chat, backup channel, group...).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(pub i64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Names one location inside a record: its `unique_resource_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationRef(String);

impl LocationRef {
    pub fn new(unique_resource_id: impl Into<String>) -> Self {
        Self(unique_resource_id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A context-scoped path back to an object's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationHandle {
    /// Platform handle; only valid for sends from within `context_id`.
    pub handle: String,
    /// Conversation the handle was issued in.
    pub context_id: ContextId,
    /// Message/resource inside `context_id` that can be forwarded or copied.
    pub resource_ref: i64,
    /// Identifies the underlying resource, however many handles point at it.
    pub unique_resource_id: String,
}

impl LocationHandle {
    pub fn new(
        handle: impl Into<String>,
        context_id: ContextId,
        resource_ref: i64,
        unique_resource_id: impl Into<String>,
    ) -> Self {
        Self {
            handle: handle.into(),
            context_id,
            resource_ref,
            unique_resource_id: unique_resource_id.into(),
        }
    }

    pub fn location_ref(&self) -> LocationRef {
        LocationRef::new(self.unique_resource_id.clone())
    }
}

// ── Health ───────────────────────────────────────────────────────────────

/// Liveness of a single location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocationStatus {
    Active,
    Suspect,
    Dead,
}

impl fmt::Display for LocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LocationStatus::Active => "ACTIVE",
            LocationStatus::Suspect => "SUSPECT",
            LocationStatus::Dead => "DEAD",
        };
        f.write_str(s)
    }
}

/// Why an attempt on a location failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Timeout, rate limit, or an unclassified platform rejection.
    Transient,
    /// The handle no longer works; the resource may still be forwardable.
    HandleExpired,
    /// The resource itself is gone from its context.
    ResourceGone,
}

/// Result of one delivery attempt or probe against a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The location served the object. `handle_expired` records whether the
    /// handle had to be bypassed to get there.
    Alive { handle_expired: bool },
    Failed(FailureKind),
}

impl Observation {
    pub fn is_alive(&self) -> bool {
        matches!(self, Observation::Alive { .. })
    }
}

/// Health bookkeeping for one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationHealth {
    pub status: LocationStatus,
    /// Consecutive failures since the last success.
    pub failure_count: u32,
    /// Time of the last applied observation (Unix ms).
    pub last_validated_at: u64,
    /// A resend through the handle failed with an expiry; use forward instead.
    pub handle_expired: bool,
}

impl LocationHealth {
    pub fn new(now: u64) -> Self {
        Self {
            status: LocationStatus::Active,
            failure_count: 0,
            last_validated_at: now,
            handle_expired: false,
        }
    }

    /// Apply an observation taken at `at`.
    ///
    /// Last-writer-wins on `at`: an observation older than the last applied
    /// one is discarded and `false` is returned.
    pub fn observe(&mut self, observation: Observation, at: u64, threshold: u32) -> bool {
        if at < self.last_validated_at {
            return false;
        }
        match observation {
            Observation::Alive { handle_expired } => {
                self.status = LocationStatus::Active;
                self.failure_count = 0;
                self.handle_expired = handle_expired;
            }
            Observation::Failed(kind) => {
                self.failure_count = self.failure_count.saturating_add(1);
                self.status = if self.failure_count >= threshold {
                    LocationStatus::Dead
                } else {
                    LocationStatus::Suspect
                };
                if kind == FailureKind::HandleExpired {
                    self.handle_expired = true;
                }
            }
        }
        self.last_validated_at = at;
        true
    }

    /// DEAD and still inside the cooldown window.
    pub fn is_cooling_down(&self, now: u64, cooldown_ms: u64) -> bool {
        self.status == LocationStatus::Dead
            && now < self.last_validated_at.saturating_add(cooldown_ms)
    }

    pub fn is_dead(&self) -> bool {
        self.status == LocationStatus::Dead
    }
}

/// A location plus its health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationEntry {
    pub location: LocationHandle,
    pub health: LocationHealth,
    /// When the location joined the record (Unix ms).
    pub added_at: u64,
}

impl LocationEntry {
    pub fn new(location: LocationHandle, now: u64) -> Self {
        Self {
            location,
            health: LocationHealth::new(now),
            added_at: now,
        }
    }

    pub fn location_ref(&self) -> LocationRef {
        self.location.location_ref()
    }
}

// ── Record ───────────────────────────────────────────────────────────────

/// Every known path back to one object's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub content_id: ContentId,
    pub display_name: String,
    pub size_bytes: u64,
    pub mime_type: Option<String>,
    /// Where the object was first uploaded.
    pub origin: LocationEntry,
    /// Repository copies, in priority order.
    pub replicas: Vec<LocationEntry>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl BackupRecord {
    pub fn new(
        content_id: ContentId,
        origin: LocationHandle,
        display_name: String,
        size_bytes: u64,
        mime_type: Option<String>,
        now: u64,
    ) -> Self {
        Self {
            content_id,
            display_name,
            size_bytes,
            mime_type,
            origin: LocationEntry::new(origin, now),
            replicas: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Origin first, then replicas in priority order.
    pub fn locations(&self) -> impl Iterator<Item = &LocationEntry> {
        std::iter::once(&self.origin).chain(self.replicas.iter())
    }

    pub fn location(&self, location_ref: &LocationRef) -> Option<&LocationEntry> {
        self.locations()
            .find(|e| e.location.unique_resource_id == location_ref.as_str())
    }

    fn location_mut(&mut self, location_ref: &LocationRef) -> Option<&mut LocationEntry> {
        std::iter::once(&mut self.origin)
            .chain(self.replicas.iter_mut())
            .find(|e| e.location.unique_resource_id == location_ref.as_str())
    }

    /// Whether any location already points at this resource.
    pub fn contains_resource(&self, unique_resource_id: &str) -> bool {
        self.locations()
            .any(|e| e.location.unique_resource_id == unique_resource_id)
    }

    /// Append a replica. Returns `false` if the resource is already known.
    pub fn push_replica(&mut self, location: LocationHandle, now: u64) -> bool {
        if self.contains_resource(&location.unique_resource_id) {
            return false;
        }
        self.replicas.push(LocationEntry::new(location, now));
        self.updated_at = self.updated_at.max(now);
        true
    }

    /// Apply an observation to one location.
    ///
    /// Returns `None` if the location is unknown, otherwise whether the
    /// observation was applied (see [`LocationHealth::observe`]).
    pub fn observe(
        &mut self,
        location_ref: &LocationRef,
        observation: Observation,
        at: u64,
        threshold: u32,
    ) -> Option<bool> {
        let entry = self.location_mut(location_ref)?;
        let applied = entry.health.observe(observation, at, threshold);
        if applied {
            self.updated_at = self.updated_at.max(at);
        }
        Some(applied)
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Locations that are not DEAD.
    pub fn live_location_count(&self) -> usize {
        self.locations().filter(|e| !e.health.is_dead()).count()
    }

    /// Replicas that are not DEAD. Zero means the origin is a single point of failure.
    pub fn live_replica_count(&self) -> usize {
        self.replicas.iter().filter(|e| !e.health.is_dead()).count()
    }

    /// Every location is DEAD.
    pub fn is_unrecoverable(&self) -> bool {
        self.live_location_count() == 0
    }

    /// Whether a non-DEAD location already lives in `context_id`.
    pub fn has_live_location_in(&self, context_id: ContextId) -> bool {
        self.locations()
            .any(|e| e.location.context_id == context_id && !e.health.is_dead())
    }

    /// Oldest `last_validated_at` across locations.
    pub fn stalest_validation_at(&self) -> u64 {
        self.locations()
            .map(|e| e.health.last_validated_at)
            .min()
            .unwrap_or(self.created_at)
    }

    /// Locations that are SUSPECT or DEAD.
    pub fn unhealthy_count(&self) -> usize {
        self.locations()
            .filter(|e| e.health.status != LocationStatus::Active)
            .count()
    }

    /// Whether the sweeper has anything to look at in this record.
    pub fn needs_sweep(&self, stale_before: u64) -> bool {
        self.unhealthy_count() > 0 || self.stalest_validation_at() < stale_before
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BackupError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, BackupError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

// ── Outcomes ─────────────────────────────────────────────────────────────

/// The single user-facing text for anything other than a delivery.
pub const UNAVAILABLE_MESSAGE: &str = "This file is temporarily unavailable, please retry later.";

/// Result of a resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Delivered; `handle` is the new handle in the destination context.
    Delivered {
        handle: LocationHandle,
        via: LocationRef,
    },
    /// No record for this content identity.
    NotFound,
    /// Every candidate failed.
    Unrecoverable,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    /// What the end user sees when nothing was delivered.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            DeliveryOutcome::Delivered { .. } => None,
            DeliveryOutcome::NotFound | DeliveryOutcome::Unrecoverable => {
                Some(UNAVAILABLE_MESSAGE)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(uid: &str, ctx: i64) -> LocationHandle {
        LocationHandle::new(format!("h-{uid}"), ContextId(ctx), 7, uid)
    }

    fn record() -> BackupRecord {
        BackupRecord::new(
            ContentId::from_bytes([0xab; 32]),
            loc("origin", 1),
            "book.epub".into(),
            1024,
            Some("application/epub+zip".into()),
            10_000,
        )
    }

    #[test]
    fn content_id_hex_roundtrip() {
        let id = ContentId::from_bytes([0x0f; 32]);
        let hex = id.to_string();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("0f0f"));
        assert_eq!(hex.parse::<ContentId>().unwrap(), id);
        assert_eq!(id.short().len(), 16);
    }

    #[test]
    fn content_id_rejects_bad_input() {
        assert!("zz".parse::<ContentId>().is_err());
        assert!("abcd".parse::<ContentId>().is_err());
    }

    #[test]
    fn new_record_has_active_origin() {
        let r = record();
        assert_eq!(r.locations().count(), 1);
        assert_eq!(r.origin.health.status, LocationStatus::Active);
        assert_eq!(r.origin.health.failure_count, 0);
        assert!(!r.is_unrecoverable());
    }

    #[test]
    fn three_failures_flip_to_dead() {
        let mut h = LocationHealth::new(0);
        let fail = Observation::Failed(FailureKind::Transient);

        assert!(h.observe(fail, 1, FAILURE_THRESHOLD));
        assert_eq!(h.status, LocationStatus::Suspect);
        h.observe(fail, 2, FAILURE_THRESHOLD);
        assert_eq!(h.status, LocationStatus::Suspect);
        h.observe(fail, 3, FAILURE_THRESHOLD);
        assert_eq!(h.status, LocationStatus::Dead);
        assert_eq!(h.failure_count, 3);
    }

    #[test]
    fn success_resets_failures() {
        let mut h = LocationHealth::new(0);
        h.observe(Observation::Failed(FailureKind::Transient), 1, 3);
        h.observe(Observation::Failed(FailureKind::Transient), 2, 3);
        h.observe(Observation::Alive { handle_expired: false }, 3, 3);
        assert_eq!(h.status, LocationStatus::Active);
        assert_eq!(h.failure_count, 0);

        // The streak starts over
        h.observe(Observation::Failed(FailureKind::Transient), 4, 3);
        assert_eq!(h.status, LocationStatus::Suspect);
    }

    #[test]
    fn stale_observation_discarded() {
        let mut h = LocationHealth::new(0);
        assert!(h.observe(Observation::Alive { handle_expired: false }, 500, 3));
        // Older failure arrives late
        assert!(!h.observe(Observation::Failed(FailureKind::ResourceGone), 400, 3));
        assert_eq!(h.status, LocationStatus::Active);
        assert_eq!(h.last_validated_at, 500);
    }

    #[test]
    fn handle_expiry_is_sticky_until_resend_works() {
        let mut h = LocationHealth::new(0);
        h.observe(Observation::Failed(FailureKind::HandleExpired), 1, 3);
        assert!(h.handle_expired);
        h.observe(Observation::Alive { handle_expired: true }, 2, 3);
        assert!(h.handle_expired);
        assert_eq!(h.status, LocationStatus::Active);
        h.observe(Observation::Alive { handle_expired: false }, 3, 3);
        assert!(!h.handle_expired);
    }

    #[test]
    fn cooldown_window() {
        let mut h = LocationHealth::new(0);
        for t in 1..=3 {
            h.observe(Observation::Failed(FailureKind::Transient), t * 100, 3);
        }
        assert!(h.is_cooling_down(300, 1000));
        assert!(h.is_cooling_down(1299, 1000));
        assert!(!h.is_cooling_down(1300, 1000));
    }

    #[test]
    fn push_replica_dedups_on_unique_id() {
        let mut r = record();
        assert!(r.push_replica(loc("r1", 2), 11_000));
        let same_uid = LocationHandle::new("other-handle", ContextId(3), 9, "r1");
        assert!(!r.push_replica(same_uid, 12_000));
        assert!(!r.push_replica(loc("origin", 4), 12_000));
        assert_eq!(r.replica_count(), 1);
        assert_eq!(r.updated_at, 11_000);
    }

    #[test]
    fn unrecoverable_when_all_dead() {
        let mut r = record();
        r.push_replica(loc("r1", 2), 10_000);
        let fail = Observation::Failed(FailureKind::ResourceGone);
        for t in 1..=3 {
            r.observe(&LocationRef::new("origin"), fail, 10_000 + t, 3);
        }
        assert!(!r.is_unrecoverable());
        assert_eq!(r.live_replica_count(), 1);
        for t in 1..=3 {
            r.observe(&LocationRef::new("r1"), fail, 10_000 + t, 3);
        }
        assert!(r.is_unrecoverable());
        assert_eq!(r.unhealthy_count(), 2);
    }

    #[test]
    fn observe_unknown_location() {
        let mut r = record();
        let res = r.observe(
            &LocationRef::new("nope"),
            Observation::Alive { handle_expired: false },
            20_000,
            3,
        );
        assert_eq!(res, None);
    }

    #[test]
    fn needs_sweep_rules() {
        let mut r = record();
        assert!(!r.needs_sweep(10_000));
        assert!(r.needs_sweep(10_001));
        r.observe(
            &LocationRef::new("origin"),
            Observation::Failed(FailureKind::Transient),
            50_000,
            3,
        );
        assert!(r.needs_sweep(0));
    }

    #[test]
    fn record_msgpack_roundtrip() {
        let mut r = record();
        r.push_replica(loc("r1", -100), 11_000);
        let bytes = r.to_bytes().unwrap();
        let decoded = BackupRecord::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, r);
    }

    #[test]
    fn outcome_user_message() {
        assert_eq!(DeliveryOutcome::Unrecoverable.user_message(), Some(UNAVAILABLE_MESSAGE));
        assert_eq!(DeliveryOutcome::NotFound.user_message(), Some(UNAVAILABLE_MESSAGE));
        let d = DeliveryOutcome::Delivered {
            handle: loc("x", 1),
            via: LocationRef::new("origin"),
        };
        assert!(d.is_delivered());
        assert_eq!(d.user_message(), None);
    }
}
