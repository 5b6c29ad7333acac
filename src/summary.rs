// 📊 Summary - Aggregates the dashboard reads from the reconciled table
// Park / period filtering, headline totals, and a monthly actual-vs-estimated
// series. Rendering is somebody else's job; this only shapes the numbers.

use crate::normalize::turkish_upper;
use crate::reconciliation::ReconciledInvoice;
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

// ============================================================================
// FILTER
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceFilter {
    /// `None` selects every park
    pub park: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1).map(|d| d - Duration::days(1))
}

impl InvoiceFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Whole months: first day of `from` through last day of `to`.
    /// Months given in the wrong order are swapped. `None` for an invalid month.
    pub fn for_months(park: Option<String>, from: (i32, u32), to: (i32, u32)) -> Option<Self> {
        let (from, to) = if from > to { (to, from) } else { (from, to) };
        Some(InvoiceFilter {
            park,
            from: Some(NaiveDate::from_ymd_opt(from.0, from.1, 1)?),
            to: Some(last_day_of_month(to.0, to.1)?),
        })
    }

    /// An invoice is in range when its whole read period is.
    pub fn matches(&self, invoice: &ReconciledInvoice) -> bool {
        let (from, to) = match (self.from, self.to) {
            (Some(a), Some(b)) if a > b => (Some(b), Some(a)),
            bounds => bounds,
        };

        if let Some(park) = &self.park {
            if turkish_upper(park.trim()) != turkish_upper(invoice.park_name.trim()) {
                return false;
            }
        }
        if let Some(from) = from {
            if invoice.start_read_date < from {
                return false;
            }
        }
        if let Some(to) = to {
            if invoice.end_read_date > to {
                return false;
            }
        }
        true
    }

    pub fn apply<'a>(&self, invoices: &'a [ReconciledInvoice]) -> Vec<&'a ReconciledInvoice> {
        invoices.iter().filter(|i| self.matches(i)).collect()
    }
}

// ============================================================================
// KPI TOTALS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiSummary {
    pub invoice_count: usize,
    pub total_actual_m3: i64,
    pub total_estimated_m3: f64,
    pub total_difference_m3: f64,
    /// total difference / total estimate × 100, 0 without an estimate
    pub variance_pct: f64,
    /// Sum over distinct parks, not over invoices
    pub total_grass_area_m2: f64,
}

pub fn kpi_summary(invoices: &[&ReconciledInvoice]) -> KpiSummary {
    let total_actual_m3: i64 = invoices.iter().map(|i| i.actual_volume_m3).sum();
    let total_estimated_m3: f64 = invoices.iter().map(|i| i.estimated_volume_m3).sum();
    let total_difference_m3: f64 = invoices.iter().map(|i| i.difference_m3).sum();

    let mut seen = HashSet::new();
    let total_grass_area_m2 = invoices
        .iter()
        .filter(|i| seen.insert(i.park_name.as_str()))
        .map(|i| i.grass_area_m2)
        .sum();

    KpiSummary {
        invoice_count: invoices.len(),
        total_actual_m3,
        total_estimated_m3,
        total_difference_m3,
        variance_pct: crate::reconciliation::difference_pct(total_difference_m3, total_estimated_m3),
        total_grass_area_m2,
    }
}

// ============================================================================
// MONTHLY SERIES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyVolume {
    pub year: i32,
    pub month: u32,
    pub actual_m3: f64,
    pub estimated_m3: f64,
}

impl MonthlyVolume {
    pub fn label(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

/// Spread each invoice's volumes evenly over its days, then total per month.
/// Invoices spanning a month boundary contribute to both months pro rata.
pub fn monthly_series(invoices: &[&ReconciledInvoice]) -> Vec<MonthlyVolume> {
    let mut months: BTreeMap<(i32, u32), (f64, f64)> = BTreeMap::new();

    for invoice in invoices {
        let days = (invoice.end_read_date - invoice.start_read_date).num_days() + 1;
        if days <= 0 {
            continue;
        }
        let daily_actual = invoice.actual_volume_m3 as f64 / days as f64;
        let daily_estimated = invoice.estimated_volume_m3 / days as f64;

        let mut day = invoice.start_read_date;
        while day <= invoice.end_read_date {
            let entry = months.entry((day.year(), day.month())).or_insert((0.0, 0.0));
            entry.0 += daily_actual;
            entry.1 += daily_estimated;
            day += Duration::days(1);
        }
    }

    months
        .into_iter()
        .map(|((year, month), (actual_m3, estimated_m3))| MonthlyVolume {
            year,
            month,
            actual_m3,
            estimated_m3,
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
