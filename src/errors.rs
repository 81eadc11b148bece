use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("IO_BUSY: {0}")]
    TransientIo(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("SAVE_FAILED: {0}")]
    Save(String),
    #[error("WATCH_FAILED: {0}")]
    Watch(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("INVALID: {0}")]
    Invalid(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors after which the caller should keep its last good state and retry later.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::TransientIo(_) | Self::Save(_))
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<notify::Error> for AppError {
    fn from(value: notify::Error) -> Self {
        Self::Watch(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn display_carries_stable_code_prefix() {
        let error = AppError::TransientIo("active.csv is locked".to_string());
        assert_eq!(error.to_string(), "IO_BUSY: active.csv is locked");
        assert!(error.is_recoverable());
        assert!(!AppError::Invalid("bad".to_string()).is_recoverable());
    }
}
