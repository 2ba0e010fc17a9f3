use std::future::Future;
use std::time::Duration;

use crate::error::PlatformError;
use crate::types::{ContextId, LocationHandle};

/// Result of a liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Gone,
}

/// Opaque messaging-platform capabilities used by the backup layer.
///
/// In production: implemented over the bot API client.
/// In tests: implemented by `MockPlatform` (scripted failures, call log).
#[async_trait::async_trait]
pub trait Platform: Send + Sync {
    /// Send the object to `destination` using the location's handle.
    ///
    /// Return [`PlatformError::Unsupported`] when the handle cannot be used
    /// for this destination; the resolver then falls back to `forward`.
    async fn resend(
        &self,
        location: &LocationHandle,
        destination: ContextId,
        caption: Option<&str>,
    ) -> Result<LocationHandle, PlatformError>;

    /// Forward/copy `resource_ref` from `source` into `destination`,
    /// returning the handle of the new copy.
    async fn forward(
        &self,
        source: ContextId,
        resource_ref: i64,
        destination: ContextId,
        caption: Option<&str>,
    ) -> Result<LocationHandle, PlatformError>;

    /// Side-effect-free existence check.
    async fn probe(&self, _location: &LocationHandle) -> Result<Liveness, PlatformError> {
        Err(PlatformError::Unsupported)
    }

    /// Whether `probe` is available. Without it the sweeper does not probe.
    fn supports_probe(&self) -> bool {
        false
    }
}

/// Run a platform call under `limit`. Elapsed counts as [`PlatformError::Timeout`].
pub(crate) async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, PlatformError>
where
    F: Future<Output = Result<T, PlatformError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(PlatformError::Timeout),
    }
}

// ── MockPlatform (tests) ────────────────────────────────────────────
