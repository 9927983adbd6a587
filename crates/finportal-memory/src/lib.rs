//! In-memory storage backend for FinPortal.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
    thread,
    time::Duration,
};

use finportal_core::{Connector, Credentials, FinancialSubmission, StorageBackend, StorageError};

pub struct InMemoryStorage {
    rows: RwLock<Vec<FinancialSubmission>>,
    ids: RwLock<HashSet<Arc<str>>>,
    query_count: AtomicU64,
    query_delay: Mutex<Duration>,
    failing_queries: AtomicU32,
    failing_inserts: AtomicU32,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            ids: RwLock::new(HashSet::new()),
            query_count: AtomicU64::new(0),
            query_delay: Mutex::new(Duration::ZERO),
            failing_queries: AtomicU32::new(0),
            failing_inserts: AtomicU32::new(0),
        }
    }

    /// Number of read queries served so far.
    pub fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::SeqCst)
    }

    pub fn row_count(&self) -> usize {
        self.rows.read().unwrap().len()
    }

    /// Makes every read sleep, to widen race windows in tests.
    pub fn set_query_delay(&self, delay: Duration) {
        *self.query_delay.lock().unwrap() = delay;
    }

    /// The next `n` reads fail with `StorageError::Other`.
    pub fn fail_next_queries(&self, n: u32) {
        self.failing_queries.store(n, Ordering::SeqCst);
    }

    /// The next `n` inserts fail with `StorageError::Other`.
    pub fn fail_next_inserts(&self, n: u32) {
        self.failing_inserts.store(n, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn begin_query(&self) -> Result<(), StorageError> {
        self.query_count.fetch_add(1, Ordering::SeqCst);
        let delay = *self.query_delay.lock().unwrap();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if Self::take_failure(&self.failing_queries) {
            return Err(StorageError::Other("injected query failure".to_string()));
        }
        Ok(())
    }

    fn newest_first(&self) -> Vec<FinancialSubmission> {
        let mut rows: Vec<_> = self.rows.read().unwrap().iter().rev().cloned().collect();
        // stable: equal timestamps keep newest-inserted first
        rows.sort_by(|a, b| b.submission_date.cmp(&a.submission_date));
        rows
    }
}

impl StorageBackend for InMemoryStorage {
    fn insert_submission(&self, record: &FinancialSubmission) -> Result<(), StorageError> {
        if Self::take_failure(&self.failing_inserts) {
            return Err(StorageError::Other("injected insert failure".to_string()));
        }

        let mut ids = self.ids.write().unwrap();
        if ids.contains(&record.submission_id) {
            return Err(StorageError::DuplicateKey(record.submission_id.to_string()));
        }
        ids.insert(record.submission_id.clone());
        self.rows.write().unwrap().push(record.clone());
        tracing::debug!(submission_id = %record.submission_id, "Row appended");
        Ok(())
    }

    fn recent_submissions(&self, limit: usize) -> Result<Vec<FinancialSubmission>, StorageError> {
        self.begin_query()?;
        let mut rows = self.newest_first();
        rows.truncate(limit);
        Ok(rows)
    }

    fn all_submissions(&self) -> Result<Vec<FinancialSubmission>, StorageError> {
        self.begin_query()?;
        Ok(self.rows.read().unwrap().clone())
    }

    fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// A live handle onto shared in-memory storage. Once its connector drops
/// sessions, every call fails as a lost connection.
struct MemorySession {
    storage: Arc<InMemoryStorage>,
    alive: Arc<AtomicBool>,
}

impl MemorySession {
    fn check(&self) -> Result<(), StorageError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Disconnected("session closed".to_string()))
        }
    }
}

impl StorageBackend for MemorySession {
    fn insert_submission(&self, record: &FinancialSubmission) -> Result<(), StorageError> {
        self.check()?;
        self.storage.insert_submission(record)
    }

    fn recent_submissions(&self, limit: usize) -> Result<Vec<FinancialSubmission>, StorageError> {
        self.check()?;
        self.storage.recent_submissions(limit)
    }

    fn all_submissions(&self) -> Result<Vec<FinancialSubmission>, StorageError> {
        self.check()?;
        self.storage.all_submissions()
    }

    fn ping(&self) -> Result<(), StorageError> {
        self.check()
    }
}

pub struct MemoryConnector {
    storage: Arc<InMemoryStorage>,
    sessions: Mutex<Vec<Arc<AtomicBool>>>,
    connect_count: AtomicU64,
    refusals: AtomicU32,
    connect_delay: Duration,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryStorage::new()))
    }
}

impl MemoryConnector {
    pub fn new(storage: Arc<InMemoryStorage>) -> Self {
        Self {
            storage,
            sessions: Mutex::new(Vec::new()),
            connect_count: AtomicU64::new(0),
            refusals: AtomicU32::new(0),
            connect_delay: Duration::ZERO,
        }
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Number of successful connection establishments.
    pub fn connect_count(&self) -> u64 {
        self.connect_count.load(Ordering::SeqCst)
    }

    /// The next `n` connection attempts are refused.
    pub fn refuse_next(&self, n: u32) {
        self.refusals.store(n, Ordering::SeqCst);
    }

    /// Kills every handle handed out so far, as if the server restarted.
    pub fn drop_sessions(&self) {
        for alive in self.sessions.lock().unwrap().drain(..) {
            alive.store(false, Ordering::SeqCst);
        }
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn StorageBackend>, StorageError> {
        if !self.connect_delay.is_zero() {
            thread::sleep(self.connect_delay);
        }
        if InMemoryStorage::take_failure(&self.refusals) {
            return Err(StorageError::Connection(format!("{} refused connection", credentials.host)));
        }

        let alive = Arc::new(AtomicBool::new(true));
        self.sessions.lock().unwrap().push(alive.clone());
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(host = %credentials.host, "In-memory session opened");
        Ok(Arc::new(MemorySession {
            storage: self.storage.clone(),
            alive,
        }))
    }
}
