use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError, RwLock,
    },
    time::{Duration, Instant},
};

use finportal_core::{FinancialSubmission, StorageBackend, SummaryRow};

use crate::{aggregation::AggregationEngine, connection::ConnectionManager, error::PortalError};

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);
pub const MAX_RECENT_ROWS: usize = 100;

struct Entry<T> {
    value: T,
    fetched_at: Instant,
}

/// A single memoized value with a time-to-live.
///
/// Readers that find a fresh value never block on a refresh. Readers that
/// miss queue on `refresh`, so only one retrieval runs at a time and the
/// ones queued behind it take its result. Errors are returned, never stored.
///
/// A retrieval that overlaps an `invalidate` hands its value to its caller
/// but does not store it, so the next read goes back to the backend.
pub struct TtlCell<T> {
    key: &'static str,
    ttl: Duration,
    slot: RwLock<Option<Entry<T>>>,
    generation: AtomicU64,
    refresh: Mutex<()>,
}

impl<T: Clone> TtlCell<T> {
    pub fn new(key: &'static str, ttl: Duration) -> Self {
        Self {
            key,
            ttl,
            slot: RwLock::new(None),
            generation: AtomicU64::new(0),
            refresh: Mutex::new(()),
        }
    }

    fn fresh(&self) -> Option<T> {
        let slot = self.slot.read().unwrap();
        slot.as_ref()
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone())
    }

    pub fn get_or_fetch<F>(&self, fetch: F) -> Result<T, PortalError>
    where
        F: FnOnce() -> Result<T, PortalError>,
    {
        if let Some(value) = self.fresh() {
            metrics::increment_counter!("finportal_cache_hits_total", "key" => self.key);
            return Ok(value);
        }

        let _refresh = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);
        // another caller may have refreshed while we waited
        if let Some(value) = self.fresh() {
            metrics::increment_counter!("finportal_cache_hits_total", "key" => self.key);
            tracing::debug!(key = self.key, "Joined in-flight refresh");
            return Ok(value);
        }

        metrics::increment_counter!("finportal_cache_misses_total", "key" => self.key);
        let generation = self.generation.load(Ordering::SeqCst);
        let started = Instant::now();
        let value = fetch()?;

        let mut slot = self.slot.write().unwrap();
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(key = self.key, "Invalidated during refresh, result not stored");
            return Ok(value);
        }
        *slot = Some(Entry {
            value: value.clone(),
            fetched_at: Instant::now(),
        });
        tracing::debug!(key = self.key, elapsed_ms = started.elapsed().as_millis() as u64, "Cache refreshed");
        Ok(value)
    }

    pub fn invalidate(&self) {
        let mut slot = self.slot.write().unwrap();
        self.generation.fetch_add(1, Ordering::SeqCst);
        *slot = None;
    }

    pub fn is_fresh(&self) -> bool {
        self.fresh().is_some()
    }
}

/// TTL-bounded front for the two read paths.
pub struct ReadCache {
    connections: Arc<ConnectionManager>,
    recent: TtlCell<Arc<Vec<FinancialSubmission>>>,
    summary: TtlCell<Arc<Vec<SummaryRow>>>,
    recent_limit: usize,
}

impl ReadCache {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self::with_settings(connections, DEFAULT_TTL, MAX_RECENT_ROWS)
    }

    /// `recent_limit` is capped at `MAX_RECENT_ROWS`.
    pub fn with_settings(connections: Arc<ConnectionManager>, ttl: Duration, recent_limit: usize) -> Self {
        Self {
            connections,
            recent: TtlCell::new("recent", ttl),
            summary: TtlCell::new("summary", ttl),
            recent_limit: recent_limit.min(MAX_RECENT_ROWS),
        }
    }

    /// Newest submissions first.
    pub fn fetch_recent(&self) -> Result<Arc<Vec<FinancialSubmission>>, PortalError> {
        self.recent.get_or_fetch(|| {
            let mut rows = self.query(|handle| handle.recent_submissions(self.recent_limit))?;
            rows.truncate(self.recent_limit);
            Ok(Arc::new(rows))
        })
    }

    /// Per-unit statistics over every stored submission.
    pub fn fetch_summary(&self) -> Result<Arc<Vec<SummaryRow>>, PortalError> {
        self.summary.get_or_fetch(|| {
            let rows = self.query(|handle| handle.all_submissions())?;
            Ok(Arc::new(AggregationEngine::summarize(&rows)))
        })
    }

    /// Forces the next fetch of both paths to go to the backend.
    pub fn invalidate(&self) {
        self.recent.invalidate();
        self.summary.invalidate();
        tracing::debug!("Read cache invalidated");
    }

    pub fn is_fresh(&self) -> (bool, bool) {
        (self.recent.is_fresh(), self.summary.is_fresh())
    }

    fn query<T, F>(&self, run: F) -> Result<T, PortalError>
    where
        F: FnOnce(&Arc<dyn StorageBackend>) -> Result<T, finportal_core::StorageError>,
    {
        let handle = self.connections.get_connection()?;
        run(&handle).map_err(|e| {
            self.connections.report_failure(&handle, &e);
            tracing::warn!(error = %e, "Read query failed");
            PortalError::querying(e)
        })
    }
}
