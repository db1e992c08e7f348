use serde::Serialize;
use thiserror::Error;

/// Error types surfaced by the reminder core.
#[derive(Debug, Clone, Serialize, Error)]
#[serde(tag = "type", content = "message")]
pub enum AppError {
    /// Errors related to the persisted schedule store
    #[error("Storage error: {0}")]
    Storage(String),
    /// Errors reported by the notification backend
    #[error("Notification error: {0}")]
    Notification(String),
    /// Notification delivery permission was denied
    #[error("Permission error: {0}")]
    Permission(String),
    /// Errors related to data validation
    #[error("Validation error: {0}")]
    Validation(String),
    /// A schedule or item id matched nothing
    #[error("Not found: {0}")]
    NotFound(String),
    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        AppError::Storage(error.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Serialization(error.to_string())
    }
}

// Convenience constructors
impl AppError {
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        AppError::Storage(msg.into())
    }

    pub fn notification<S: Into<String>>(msg: S) -> Self {
        AppError::Notification(msg.into())
    }

    pub fn permission<S: Into<String>>(msg: S) -> Self {
        AppError::Permission(msg.into())
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        AppError::NotFound(msg.into())
    }
}

/// Result type alias used across the crate
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::storage("file not found");
        assert_eq!(err.to_string(), "Storage error: file not found");
    }

    #[test]
    fn test_error_constructors() {
        let storage_err = AppError::storage("test");
        assert!(matches!(storage_err, AppError::Storage(_)));

        let backend_err = AppError::notification("test");
        assert!(matches!(backend_err, AppError::Notification(_)));

        let missing = AppError::not_found("abc_1");
        assert_eq!(missing.to_string(), "Not found: abc_1");
    }

    #[test]
    fn test_io_error_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: AppError = io.into();
        assert!(matches!(err, AppError::Storage(ref m) if m.contains("read-only")));
    }

    #[test]
    fn test_error_serialization() {
        let err = AppError::validation("invalid input");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("Validation"));
        assert!(json.contains("invalid input"));
    }
}
