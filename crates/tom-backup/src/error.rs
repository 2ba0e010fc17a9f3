/// Backup-layer errors.
///
/// `BackupError` is what the addresser and the stores surface to callers.
/// `PlatformError` is what a platform call can fail with; the resolver and
/// coordinator absorb it per location and never hand it to end users.
use crate::types::{ContentId, FailureKind, LocationRef};

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("no backup record for {0}")]
    NotFound(ContentId),

    #[error("location {location} is not part of record {content_id}")]
    UnknownLocation {
        content_id: ContentId,
        location: LocationRef,
    },

    #[error("invalid content id: {0}")]
    InvalidContentId(String),

    #[error("read failed while hashing: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl From<rusqlite::Error> for BackupError {
    fn from(e: rusqlite::Error) -> Self {
        BackupError::Store(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for BackupError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        BackupError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for BackupError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        BackupError::Deserialization(e.to_string())
    }
}

/// Failure of a single platform call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("platform call timed out")]
    Timeout,

    #[error("rate limited (retry after {retry_after_ms:?} ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("handle expired")]
    HandleExpired,

    #[error("resource gone")]
    ResourceGone,

    /// The platform cannot perform this call for this location/destination.
    /// Not a failure of the location.
    #[error("operation not supported")]
    Unsupported,

    #[error("platform rejected call: {0}")]
    Rejected(String),
}

impl PlatformError {
    /// How this error counts against the location. `None` for `Unsupported`.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            PlatformError::Timeout
            | PlatformError::RateLimited { .. }
            | PlatformError::Rejected(_) => Some(FailureKind::Transient),
            PlatformError::HandleExpired => Some(FailureKind::HandleExpired),
            PlatformError::ResourceGone => Some(FailureKind::ResourceGone),
            PlatformError::Unsupported => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.failure_kind() == Some(FailureKind::Transient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_not_found() {
        let id = ContentId::from_bytes([0x11; 32]);
        let err = BackupError::NotFound(id);
        assert_eq!(err.to_string(), format!("no backup record for {}", id.to_hex()));
    }

    #[test]
    fn test_display_unknown_location() {
        let err = BackupError::UnknownLocation {
            content_id: ContentId::from_bytes([0; 32]),
            location: LocationRef::new("uid-1"),
        };
        assert!(err.to_string().starts_with("location uid-1 is not part of record 0000"));
    }

    #[test]
    fn test_display_rate_limited() {
        let err = PlatformError::RateLimited {
            retry_after_ms: Some(3000),
        };
        assert_eq!(err.to_string(), "rate limited (retry after Some(3000) ms)");
    }

    #[test]
    fn test_failure_kinds() {
        assert_eq!(PlatformError::Timeout.failure_kind(), Some(FailureKind::Transient));
        assert_eq!(
            PlatformError::Rejected("bad request".into()).failure_kind(),
            Some(FailureKind::Transient)
        );
        assert_eq!(
            PlatformError::HandleExpired.failure_kind(),
            Some(FailureKind::HandleExpired)
        );
        assert_eq!(
            PlatformError::ResourceGone.failure_kind(),
            Some(FailureKind::ResourceGone)
        );
        assert_eq!(PlatformError::Unsupported.failure_kind(), None);
        assert!(PlatformError::Timeout.is_transient());
        assert!(!PlatformError::ResourceGone.is_transient());
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated");
        let err: BackupError = io.into();
        assert_eq!(err.to_string(), "read failed while hashing: truncated");
    }
}
