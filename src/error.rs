use finportal_core::StorageError;
use thiserror::Error;

/// Every failure the portal core reports to its callers.
#[derive(Debug, Error)]
pub enum PortalError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("write error: {0}")]
    Write(String),
    #[error("query error: {0}")]
    Query(String),
}

impl PortalError {
    /// Failure while establishing a handle.
    pub(crate) fn connecting(e: StorageError) -> Self {
        PortalError::Connection(e.to_string())
    }

    /// Failure of an insert on an established handle.
    pub(crate) fn writing(e: StorageError) -> Self {
        PortalError::Write(e.to_string())
    }

    /// Failure of a read on an established handle.
    pub(crate) fn querying(e: StorageError) -> Self {
        PortalError::Query(e.to_string())
    }
}
