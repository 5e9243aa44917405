//! Error types for hvremote-hyperv

use hvremote_exec::ExecError;
use thiserror::Error;

/// Errors that can occur during Hyper-V host operations
#[derive(Error, Debug, Clone)]
pub enum HypervError {
    /// Remote execution or transfer failed
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// A required source file was not given
    #[error("missing source: {0}")]
    MissingSource(String),

    /// The assembly script finished but the ISO is not on the host
    #[error("ISO image was not created at {0}")]
    IsoNotCreated(String),

    /// Value could not be converted to or from JSON
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Value outside the range the host accepts
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl HypervError {
    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, HypervError::Exec(e) if e.is_retryable())
    }
}

impl From<serde_json::Error> for HypervError {
    fn from(err: serde_json::Error) -> Self {
        HypervError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_retryable_follows_exec_error() {
        let timeout = HypervError::from(ExecError::Timeout {
            timeout: Duration::from_secs(1),
        });
        assert!(timeout.is_retryable());

        let denied = HypervError::from(ExecError::AuthenticationFailed("denied".to_string()));
        assert!(!denied.is_retryable());
        assert!(!HypervError::IsoNotCreated("C:\\Iso\\a.iso".to_string()).is_retryable());
    }
}
