use std::{fmt, sync::Arc};

use crate::models::FinancialSubmission;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("connection lost: {0}")]
    Disconnected(String),
    #[error("{0}")]
    Other(String),
}

impl StorageError {
    /// True when the handle that produced this error should not be reused.
    pub fn is_liveness_failure(&self) -> bool {
        matches!(self, StorageError::Connection(_) | StorageError::Disconnected(_))
    }
}

/// Opaque connection settings for a backend. Each connector decides how to
/// interpret the three fields.
#[derive(Clone, Default)]
pub struct Credentials {
    pub host: String,
    pub http_path: String,
    pub access_token: String,
}

impl Credentials {
    pub fn new(host: &str, http_path: &str, access_token: &str) -> Self {
        Self {
            host: host.to_string(),
            http_path: http_path.to_string(),
            access_token: access_token.to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("http_path", &self.http_path)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

pub trait StorageBackend: Send + Sync {
    /// Single-row insert. Must fail with `DuplicateKey` if the id already exists.
    fn insert_submission(&self, record: &FinancialSubmission) -> Result<(), StorageError>;
    /// At most `limit` rows, newest `submission_date` first.
    fn recent_submissions(&self, limit: usize) -> Result<Vec<FinancialSubmission>, StorageError>;
    fn all_submissions(&self) -> Result<Vec<FinancialSubmission>, StorageError>;
    fn ping(&self) -> Result<(), StorageError>;
}

pub trait Connector: Send + Sync {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn StorageBackend>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_hides_token() {
        let creds = Credentials::new("db.example.com", "/sql/1.0/warehouses/abc", "s3cret");
        let out = format!("{:?}", creds);
        assert!(out.contains("db.example.com"));
        assert!(!out.contains("s3cret"));
    }

    #[test]
    fn liveness_classification() {
        assert!(StorageError::Disconnected("eof".into()).is_liveness_failure());
        assert!(StorageError::Connection("refused".into()).is_liveness_failure());
        assert!(!StorageError::DuplicateKey("sub_0".into()).is_liveness_failure());
        assert!(!StorageError::Other("syntax".into()).is_liveness_failure());
    }
}
