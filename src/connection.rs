use std::sync::{Arc, Mutex};

use finportal_core::{Connector, Credentials, StorageBackend, StorageError};

use crate::error::PortalError;

/// Owns the single live handle to the storage backend.
///
/// The handle is established lazily by the first caller and shared by all
/// later callers. Establishment happens under the lock, so racing callers wait
/// for one connection instead of each opening their own. A failed attempt
/// leaves nothing cached and the next call tries again.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    credentials: Credentials,
    handle: Mutex<Option<Arc<dyn StorageBackend>>>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, credentials: Credentials) -> Self {
        Self {
            connector,
            credentials,
            handle: Mutex::new(None),
        }
    }

    /// Establishes the handle eagerly.
    pub fn init(&self) -> Result<(), PortalError> {
        self.get_connection().map(|_| ())
    }

    pub fn get_connection(&self) -> Result<Arc<dyn StorageBackend>, PortalError> {
        let mut slot = self.handle.lock().unwrap();
        if let Some(handle) = slot.as_ref() {
            return Ok(handle.clone());
        }

        let handle = self.connector.connect(&self.credentials).map_err(|e| {
            tracing::warn!(host = %self.credentials.host, error = %e, "Connection attempt failed");
            PortalError::connecting(e)
        })?;
        metrics::increment_counter!("finportal_connections_established_total");
        tracing::info!(host = %self.credentials.host, "Storage connection established");
        *slot = Some(handle.clone());
        Ok(handle)
    }

    pub fn is_connected(&self) -> bool {
        self.handle.lock().unwrap().is_some()
    }

    /// Drops the cached handle; the next call reconnects.
    pub fn reset(&self) {
        if self.handle.lock().unwrap().take().is_some() {
            tracing::info!("Storage connection reset");
        }
    }

    pub fn close(&self) {
        if self.handle.lock().unwrap().take().is_some() {
            tracing::info!("Storage connection closed");
        }
    }

    /// Called with an error raised by `handle`. Liveness failures evict the
    /// handle, but only if it is still the cached one.
    pub(crate) fn report_failure(&self, handle: &Arc<dyn StorageBackend>, error: &StorageError) {
        if !error.is_liveness_failure() {
            return;
        }
        let mut slot = self.handle.lock().unwrap();
        let is_current = slot
            .as_ref()
            .map(|current| same_handle(current, handle))
            .unwrap_or(false);
        if is_current {
            tracing::warn!(error = %error, "Discarding stale storage connection");
            *slot = None;
        }
    }
}

fn same_handle(a: &Arc<dyn StorageBackend>, b: &Arc<dyn StorageBackend>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
