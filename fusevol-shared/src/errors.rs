//! Error types for the fusevol driver.

use thiserror::Error;

/// Result alias used across the driver.
pub type FusevolResult<T> = Result<T, FusevolError>;

/// Every condition a driver operation can report to its caller.
#[derive(Error, Debug)]
pub enum FusevolError {
    #[error("volume not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("volume {volume_id:?} already mounted at {mount_path:?}")]
    AlreadyMounted {
        volume_id: String,
        mount_path: String,
    },

    #[error("device {0} not mounted")]
    NotMounted(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Backing directory creation or removal failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The OS-level mount could not be set up.
    #[error("session establish failed: {0}")]
    SessionEstablish(String),

    /// The session became ready but reported a terminal mount error.
    #[error("session mount failed: {0}")]
    SessionMount(String),

    #[error("session not ready: {0}")]
    SessionTimeout(String),

    /// The OS-level unmount of a session failed.
    #[error("session terminate failed: {0}")]
    SessionTerminate(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FusevolError {
    /// True for conditions that no retry will ever change.
    pub fn is_permanent(&self) -> bool {
        matches!(self, FusevolError::Unsupported(_))
    }
}

impl From<std::io::Error> for FusevolError {
    fn from(err: std::io::Error) -> Self {
        FusevolError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for FusevolError {
    fn from(err: serde_json::Error) -> Self {
        FusevolError::Internal(format!("serialization failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_mounted_names_existing_path() {
        let err = FusevolError::AlreadyMounted {
            volume_id: "v1".to_string(),
            mount_path: "/mnt/a".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("v1"));
        assert!(msg.contains("/mnt/a"));
    }

    #[test]
    fn test_io_error_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: FusevolError = io.into();
        assert!(matches!(err, FusevolError::Storage(_)));
    }

    #[test]
    fn test_only_unsupported_is_permanent() {
        assert!(FusevolError::Unsupported("snapshot".into()).is_permanent());
        assert!(!FusevolError::NotFound("v1".into()).is_permanent());
    }
}
