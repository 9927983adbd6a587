use std::collections::BTreeMap;

use finportal_core::{BusinessUnit, FinancialSubmission, Kpis, SummaryRow};

/// Stateless per-unit statistics over raw submissions.
pub struct AggregationEngine;

#[derive(Default)]
struct Accumulator {
    count: u64,
    revenue: f64,
    expenses: f64,
    margin: f64,
}

impl AggregationEngine {
    /// One row per business unit present in `rows`, ordered by total revenue
    /// descending and then by unit name.
    ///
    /// The average margin is the mean of the stored per-row margins, not a
    /// margin recomputed from the summed totals.
    pub fn summarize(rows: &[FinancialSubmission]) -> Vec<SummaryRow> {
        let mut groups: BTreeMap<BusinessUnit, Accumulator> = BTreeMap::new();
        for row in rows {
            let acc = groups.entry(row.business_unit).or_default();
            acc.count += 1;
            acc.revenue += row.revenue;
            acc.expenses += row.expenses;
            acc.margin += row.profit_margin;
        }

        let mut summary: Vec<SummaryRow> = groups
            .into_iter()
            .map(|(business_unit, acc)| SummaryRow {
                business_unit,
                submission_count: acc.count,
                total_revenue: acc.revenue,
                total_expenses: acc.expenses,
                avg_profit_margin: acc.margin / acc.count as f64,
            })
            .collect();

        summary.sort_by(|a, b| {
            b.total_revenue
                .total_cmp(&a.total_revenue)
                .then_with(|| a.business_unit.as_str().cmp(b.business_unit.as_str()))
        });
        summary
    }

    pub fn kpis(rows: &[FinancialSubmission]) -> Kpis {
        if rows.is_empty() {
            return Kpis::default();
        }
        let total_revenue = rows.iter().map(|r| r.revenue).sum();
        let total_expenses = rows.iter().map(|r| r.expenses).sum();
        let margin_sum: f64 = rows.iter().map(|r| r.profit_margin).sum();
        Kpis {
            total_revenue,
            total_expenses,
            avg_profit_margin: margin_sum / rows.len() as f64,
            submission_count: rows.len() as u64,
        }
    }
}
