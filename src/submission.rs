use std::sync::Arc;

use finportal_core::{BusinessUnit, FinancialSubmission, NewSubmission, StorageError};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{cache::ReadCache, connection::ConnectionManager, error::PortalError};

/// How many fresh ids a submission tries before giving up on key collisions.
pub const MAX_ID_ATTEMPTS: usize = 3;

pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// `sub_` followed by the first 8 hex digits of a random v4 UUID.
pub fn generate_submission_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("sub_{}", &hex[..8])
}

/// Percentage margin; zero when there is no revenue.
pub fn profit_margin(revenue: f64, expenses: f64) -> f64 {
    if revenue > 0.0 {
        (revenue - expenses) / revenue * 100.0
    } else {
        0.0
    }
}

fn validate_amount(name: &str, value: f64) -> Result<(), PortalError> {
    if !value.is_finite() {
        return Err(PortalError::Validation(format!("{} must be a finite number", name)));
    }
    if value < 0.0 {
        return Err(PortalError::Validation(format!("{} must not be negative, got {}", name, value)));
    }
    Ok(())
}

/// Margin for amounts that already passed `validate_amount`. A tiny revenue
/// against large expenses can overflow to infinity; that is rejected here.
fn checked_margin(revenue: f64, expenses: f64) -> Result<f64, PortalError> {
    let margin = profit_margin(revenue, expenses);
    if !margin.is_finite() {
        return Err(PortalError::Validation(format!(
            "profit margin for revenue {} and expenses {} is out of range",
            revenue, expenses
        )));
    }
    Ok(margin)
}

/// Result of a successful write. The read cache has already been
/// invalidated when this is returned, so the next fetch sees the new row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionReceipt {
    pub submission_id: Arc<str>,
    pub profit_margin: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
}

pub struct SubmissionService {
    connections: Arc<ConnectionManager>,
    cache: Arc<ReadCache>,
    id_generator: IdGenerator,
}

impl SubmissionService {
    pub fn new(connections: Arc<ConnectionManager>, cache: Arc<ReadCache>) -> Self {
        Self {
            connections,
            cache,
            id_generator: Arc::new(generate_submission_id),
        }
    }

    pub fn with_id_generator(mut self, id_generator: IdGenerator) -> Self {
        self.id_generator = id_generator;
        self
    }

    /// Validates and records one submission. `business_unit` must be one of
    /// the exact names in `BusinessUnit::ALL`.
    pub fn submit(
        &self,
        business_unit: &str,
        revenue: f64,
        expenses: f64,
        submitted_by: &str,
    ) -> Result<SubmissionReceipt, PortalError> {
        let business_unit = business_unit
            .parse::<BusinessUnit>()
            .map_err(|e| PortalError::Validation(e.to_string()))?;
        self.submit_new(&NewSubmission::new(business_unit, revenue, expenses, submitted_by))
    }

    pub fn submit_new(&self, command: &NewSubmission) -> Result<SubmissionReceipt, PortalError> {
        validate_amount("revenue", command.revenue)?;
        validate_amount("expenses", command.expenses)?;
        let margin = checked_margin(command.revenue, command.expenses)?;

        let handle = self.connections.get_connection()?;

        for attempt in 1..=MAX_ID_ATTEMPTS {
            let now = OffsetDateTime::now_utc();
            let record = FinancialSubmission {
                submission_id: Arc::from((self.id_generator)().as_str()),
                business_unit: command.business_unit,
                submission_date: now,
                revenue: command.revenue,
                expenses: command.expenses,
                profit_margin: margin,
                submitted_by: command.submitted_by.clone(),
                created_at: now,
            };

            match handle.insert_submission(&record) {
                Ok(()) => {
                    self.cache.invalidate();
                    metrics::increment_counter!("finportal_submissions_total");
                    tracing::info!(
                        submission_id = %record.submission_id,
                        business_unit = %record.business_unit,
                        "Submission recorded"
                    );
                    return Ok(SubmissionReceipt {
                        submission_id: record.submission_id,
                        profit_margin: margin,
                        submitted_at: now,
                    });
                }
                Err(StorageError::DuplicateKey(_)) => {
                    tracing::warn!(submission_id = %record.submission_id, attempt, "Submission id collision, regenerating");
                }
                Err(e) => {
                    self.connections.report_failure(&handle, &e);
                    metrics::increment_counter!("finportal_submission_failures_total");
                    tracing::warn!(error = %e, "Submission insert failed");
                    return Err(PortalError::writing(e));
                }
            }
        }

        metrics::increment_counter!("finportal_submission_failures_total");
        Err(PortalError::Write(format!(
            "no unique submission id after {} attempts",
            MAX_ID_ATTEMPTS
        )))
    }
}
