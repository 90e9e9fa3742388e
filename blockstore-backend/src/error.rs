//! Error types for the storage backend layer.

use thiserror::Error;

/// Errors that can occur during backend operations.
///
/// The orchestrator-facing operations collapse these into [`OpStatus`];
/// the `try_*` operations surface them unchanged.
///
/// [`OpStatus`]: crate::types::OpStatus
#[derive(Error, Debug)]
pub enum BackendError {
    /// The external tool could not be started at all.
    #[error("Failed to launch {command}: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },
    
    /// An existence or capacity probe could not produce a definitive answer.
    #[error("Check failed: {0}")]
    CheckFailed(String),
    
    /// The external tool ran but reported failure.
    #[error("Operation failed: {0}")]
    OperationFailed(String),
    
    /// The target collides with or refers to a volume this backend does not manage.
    #[error("Volume not managed by this backend: {0}")]
    Unmanaged(String),
    
    /// The state file could not be read, written or parsed.
    #[error("Persistence error: {0}")]
    Persistence(String),
    
    /// A resource, snapshot or pool name failed validation.
    #[error("Invalid name: {0}")]
    InvalidName(String),
    
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BackendError {
    /// Whether this error means the operation must stop instead of retrying.
    ///
    /// A tool that cannot be launched or a probe without a definitive answer
    /// leaves the system state unknown.
    pub fn is_abort(&self) -> bool {
        matches!(self, BackendError::Launch { .. } | BackendError::CheckFailed(_))
    }
}

/// Result type alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_abort_classification() {
        let launch = BackendError::Launch {
            command: "/sbin/lvs".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(launch.is_abort());
        assert!(BackendError::CheckFailed("lvs exited 3".into()).is_abort());
        assert!(!BackendError::OperationFailed("lvremove exited 5".into()).is_abort());
        assert!(!BackendError::Unmanaged("res1_00".into()).is_abort());
    }
    
    #[test]
    fn test_launch_message_names_command() {
        let err = BackendError::Launch {
            command: "/sbin/zfs".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("/sbin/zfs"));
    }
}
