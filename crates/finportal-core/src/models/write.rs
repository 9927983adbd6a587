use std::sync::Arc;

use super::BusinessUnit;

/// Caller-supplied part of a submission. Identifiers, timestamps and the
/// profit margin are filled in at write time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubmission {
    pub business_unit: BusinessUnit,
    pub revenue: f64,
    pub expenses: f64,
    pub submitted_by: Arc<str>,
}

impl NewSubmission {
    pub fn new(business_unit: BusinessUnit, revenue: f64, expenses: f64, submitted_by: &str) -> Self {
        Self {
            business_unit,
            revenue,
            expenses,
            submitted_by: Arc::from(submitted_by),
        }
    }
}
