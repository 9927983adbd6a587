use std::{sync::Arc, time::Duration};

use finportal_core::{Connector, Credentials, FinancialSubmission, Kpis, SummaryRow};

use crate::{
    aggregation::AggregationEngine,
    cache::{ReadCache, DEFAULT_TTL, MAX_RECENT_ROWS},
    connection::ConnectionManager,
    error::PortalError,
    submission::{IdGenerator, SubmissionReceipt, SubmissionService},
};

/// The contract offered to presentation code: submit, the two cached reads,
/// and invalidation. Nothing else should talk to the backend.
pub struct Portal {
    connections: Arc<ConnectionManager>,
    cache: Arc<ReadCache>,
    submissions: SubmissionService,
}

impl Portal {
    pub fn new(connector: Arc<dyn Connector>, credentials: Credentials) -> Self {
        Self::with_settings(connector, credentials, DEFAULT_TTL, MAX_RECENT_ROWS)
    }

    pub fn with_settings(
        connector: Arc<dyn Connector>,
        credentials: Credentials,
        ttl: Duration,
        recent_limit: usize,
    ) -> Self {
        let connections = Arc::new(ConnectionManager::new(connector, credentials));
        let cache = Arc::new(ReadCache::with_settings(connections.clone(), ttl, recent_limit));
        let submissions = SubmissionService::new(connections.clone(), cache.clone());
        Self {
            connections,
            cache,
            submissions,
        }
    }

    pub fn with_id_generator(mut self, id_generator: IdGenerator) -> Self {
        self.submissions = self.submissions.with_id_generator(id_generator);
        self
    }

    pub fn submit(
        &self,
        business_unit: &str,
        revenue: f64,
        expenses: f64,
        submitted_by: &str,
    ) -> Result<SubmissionReceipt, PortalError> {
        self.submissions.submit(business_unit, revenue, expenses, submitted_by)
    }

    pub fn fetch_recent(&self) -> Result<Arc<Vec<FinancialSubmission>>, PortalError> {
        self.cache.fetch_recent()
    }

    pub fn fetch_summary(&self) -> Result<Arc<Vec<SummaryRow>>, PortalError> {
        self.cache.fetch_summary()
    }

    /// Headline figures over the recent rows.
    pub fn fetch_kpis(&self) -> Result<Kpis, PortalError> {
        let recent = self.cache.fetch_recent()?;
        Ok(AggregationEngine::kpis(&recent))
    }

    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn cache(&self) -> &ReadCache {
        &self.cache
    }

    pub fn close(&self) {
        self.cache.invalidate();
        self.connections.close();
    }
}
