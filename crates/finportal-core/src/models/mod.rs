use std::{fmt::Display, str::FromStr, sync::Arc};

use prettytable::{row, Table};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

pub mod write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BusinessUnit {
    Sales,
    Marketing,
    Operations,
    Engineering,
    Finance,
    #[serde(rename = "HR")]
    Hr,
}

impl BusinessUnit {
    /// The closed set, in the order a submission form lists them.
    pub const ALL: [BusinessUnit; 6] = [
        BusinessUnit::Sales,
        BusinessUnit::Marketing,
        BusinessUnit::Operations,
        BusinessUnit::Engineering,
        BusinessUnit::Finance,
        BusinessUnit::Hr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BusinessUnit::Sales => "Sales",
            BusinessUnit::Marketing => "Marketing",
            BusinessUnit::Operations => "Operations",
            BusinessUnit::Engineering => "Engineering",
            BusinessUnit::Finance => "Finance",
            BusinessUnit::Hr => "HR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown business unit: {0}")]
pub struct UnknownBusinessUnit(pub String);

impl FromStr for BusinessUnit {
    type Err = UnknownBusinessUnit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BusinessUnit::ALL
            .into_iter()
            .find(|unit| unit.as_str() == s)
            .ok_or_else(|| UnknownBusinessUnit(s.to_string()))
    }
}

impl Display for BusinessUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted row of `financial_submissions`. Rows are append-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinancialSubmission {
    pub submission_id: Arc<str>,
    pub business_unit: BusinessUnit,
    #[serde(with = "time::serde::rfc3339")]
    pub submission_date: OffsetDateTime,
    pub revenue: f64,
    pub expenses: f64,
    pub profit_margin: f64,
    pub submitted_by: Arc<str>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub business_unit: BusinessUnit,
    pub submission_count: u64,
    pub total_revenue: f64,
    pub total_expenses: f64,
    pub avg_profit_margin: f64,
}

/// Headline figures over a set of rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Kpis {
    pub total_revenue: f64,
    pub total_expenses: f64,
    pub avg_profit_margin: f64,
    pub submission_count: u64,
}

pub struct SummaryTable<'a>(pub &'a [SummaryRow]);

impl Display for SummaryTable<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut table = Table::new();
        table.add_row(row!["Business Unit", "Submissions", "Revenue", "Expenses", "Avg Margin"]);
        table.add_empty_row();

        for item in self.0 {
            table.add_row(row![
                item.business_unit,
                item.submission_count,
                format!("${:.2}", item.total_revenue),
                format!("${:.2}", item.total_expenses),
                format!("{:.2}%", item.avg_profit_margin)
            ]);
        }

        write!(f, "\n{}\n", table)
    }
}

pub struct RecentTable<'a>(pub &'a [FinancialSubmission]);

impl Display for RecentTable<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut table = Table::new();
        table.add_row(row!["Business Unit", "Revenue", "Expenses", "Margin", "Submitted By", "Date"]);
        table.add_empty_row();

        for item in self.0 {
            table.add_row(row![
                item.business_unit,
                format!("${:.2}", item.revenue),
                format!("${:.2}", item.expenses),
                format!("{:.2}%", item.profit_margin),
                item.submitted_by,
                item.submission_date
            ]);
        }

        write!(f, "\n{}\n", table)
    }
}
