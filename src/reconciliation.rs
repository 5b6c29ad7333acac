// ⚖️ Invoice Reconciler - Metered volume vs estimated water need
//
// For every invoice:
//   estimated_volume = Σ need_per_m²(day) for day in [start, end]  ×  grass_area
//   difference       = actual_volume - estimated_volume
//
// Invoices whose park has no confident name match are NOT silently lost:
// each one comes back as Err(UnmatchedReason) and is counted in the report.

use crate::ingest::{GreenAreaRecord, InvoiceRecord};
use crate::matcher::NameMatch;
use crate::weather::{DailyWaterNeed, WaterNeedTable};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

// ============================================================================
// JOINED GREEN AREA ↔ LEDGER NAME
// ============================================================================

/// A survey park joined to the ledger name it matched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreenAreaMatch {
    pub park_name: String,
    pub invoice_name: String,
    pub grass_area_m2: f64,
    pub score: f64,
}

/// Inner join of survey records with accepted matches on survey park name.
pub fn join_matches(green_areas: &[GreenAreaRecord], accepted: &[NameMatch]) -> Vec<GreenAreaMatch> {
    let by_name: HashMap<&str, &GreenAreaRecord> = green_areas
        .iter()
        .map(|g| (g.park_name.as_str(), g))
        .collect();

    accepted
        .iter()
        .filter_map(|m| {
            by_name.get(m.source_name.as_str()).map(|g| GreenAreaMatch {
                park_name: g.park_name.clone(),
                invoice_name: m.target_name.clone(),
                grass_area_m2: g.grass_area_m2,
                score: m.score,
            })
        })
        .collect()
}

// ============================================================================
// RECONCILED INVOICE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledInvoice {
    pub subscription_id: String,
    pub park_name: String,
    pub start_read_date: NaiveDate,
    pub end_read_date: NaiveDate,
    pub actual_volume_m3: i64,
    pub estimated_volume_m3: f64,
    pub grass_area_m2: f64,
    pub difference_m3: f64,
    pub difference_pct: f64,
}

/// Percentage deviation of actual from estimated.
/// 0 when the estimate is 0 or the ratio is not finite.
pub fn difference_pct(difference_m3: f64, estimated_volume_m3: f64) -> f64 {
    if estimated_volume_m3 == 0.0 {
        return 0.0;
    }
    let pct = difference_m3 / estimated_volume_m3 * 100.0;
    if pct.is_finite() {
        pct
    } else {
        0.0
    }
}

/// Why an invoice could not be reconciled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UnmatchedReason {
    /// The ledger name has no survey park above the similarity threshold
    NoConfidentMatch { park_name: String },

    /// Read period ends before it starts
    InvalidPeriod { start: NaiveDate, end: NaiveDate },
}

impl UnmatchedReason {
    pub fn describe(&self) -> String {
        match self {
            UnmatchedReason::NoConfidentMatch { park_name } => {
                format!("no confident green-area match for '{}'", park_name)
            }
            UnmatchedReason::InvalidPeriod { start, end } => {
                format!("read period {} → {} runs backwards", start, end)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedInvoice {
    pub invoice: InvoiceRecord,
    pub reason: UnmatchedReason,
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub reconciled: Vec<ReconciledInvoice>,
    pub dropped: Vec<DroppedInvoice>,
    pub total_invoices: usize,

    /// Invoice-days with no weather entry (each contributed 0)
    pub days_missing_weather: usize,

    /// Invoices that had at least one such day
    pub invoices_with_missing_weather: usize,
}

impl ReconciliationReport {
    pub fn unmatched_count(&self) -> usize {
        self.dropped
            .iter()
            .filter(|d| matches!(d.reason, UnmatchedReason::NoConfidentMatch { .. }))
            .count()
    }

    pub fn invalid_period_count(&self) -> usize {
        self.dropped
            .iter()
            .filter(|d| matches!(d.reason, UnmatchedReason::InvalidPeriod { .. }))
            .count()
    }

    /// Distinct ledger names that found no park
    pub fn unmatched_parks(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .dropped
            .iter()
            .filter_map(|d| match &d.reason {
                UnmatchedReason::NoConfidentMatch { park_name } => Some(park_name.clone()),
                _ => None,
            })
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn summary(&self) -> String {
        format!(
            "Reconciled {} of {} invoices ({} unmatched, {} invalid period), {} invoice-days without weather",
            self.reconciled.len(),
            self.total_invoices,
            self.unmatched_count(),
            self.invalid_period_count(),
            self.days_missing_weather
        )
    }
}

// ============================================================================
// INVOICE RECONCILER
// ============================================================================

pub struct InvoiceReconciler<'a> {
    /// Ledger name → grass area
    areas: HashMap<&'a str, f64>,
    table: &'a WaterNeedTable,
}

/// Successful per-invoice result plus its missing-weather day count
type InvoiceOutcome = Result<(ReconciledInvoice, usize), UnmatchedReason>;

impl<'a> InvoiceReconciler<'a> {
    /// When two survey parks matched the same ledger name, the higher score wins
    /// (first one on equal score).
    pub fn new(matches: &'a [GreenAreaMatch], table: &'a WaterNeedTable) -> Self {
        let mut best: HashMap<&'a str, &'a GreenAreaMatch> = HashMap::new();
        for m in matches {
            match best.get(m.invoice_name.as_str()) {
                Some(existing) if existing.score >= m.score => {
                    warn!(
                        invoice_name = %m.invoice_name,
                        kept = %existing.park_name,
                        ignored = %m.park_name,
                        "ledger name matched more than one park"
                    );
                }
                _ => {
                    best.insert(m.invoice_name.as_str(), m);
                }
            }
        }

        InvoiceReconciler {
            areas: best
                .into_iter()
                .map(|(name, m)| (name, m.grass_area_m2))
                .collect(),
            table,
        }
    }

    fn reconcile_with_gaps(&self, invoice: &InvoiceRecord) -> InvoiceOutcome {
        if !invoice.has_valid_period() {
            return Err(UnmatchedReason::InvalidPeriod {
                start: invoice.start_read_date,
                end: invoice.end_read_date,
            });
        }

        let grass_area_m2 = *self
            .areas
            .get(invoice.park_name.as_str())
            .ok_or_else(|| UnmatchedReason::NoConfidentMatch {
                park_name: invoice.park_name.clone(),
            })?;

        let period = self
            .table
            .sum_between(invoice.start_read_date, invoice.end_read_date);

        let estimated_volume_m3 = period.total_m3_per_unit_area * grass_area_m2;
        let difference_m3 = invoice.actual_volume_m3 as f64 - estimated_volume_m3;

        Ok((
            ReconciledInvoice {
                subscription_id: invoice.subscription_id.clone(),
                park_name: invoice.park_name.clone(),
                start_read_date: invoice.start_read_date,
                end_read_date: invoice.end_read_date,
                actual_volume_m3: invoice.actual_volume_m3,
                estimated_volume_m3,
                grass_area_m2,
                difference_m3,
                difference_pct: difference_pct(difference_m3, estimated_volume_m3),
            },
            period.missing_days,
        ))
    }

    /// Reconcile a single invoice
    pub fn reconcile_invoice(&self, invoice: &InvoiceRecord) -> Result<ReconciledInvoice, UnmatchedReason> {
        self.reconcile_with_gaps(invoice).map(|(r, _)| r)
    }

    /// Reconcile all invoices, keeping input order in both output lists
    pub fn reconcile_all(&self, invoices: &[InvoiceRecord]) -> ReconciliationReport {
        let mut reconciled = Vec::new();
        let mut dropped = Vec::new();
        let mut days_missing_weather = 0;
        let mut invoices_with_missing_weather = 0;

        for invoice in invoices {
            match self.reconcile_with_gaps(invoice) {
                Ok((row, missing)) => {
                    if missing > 0 {
                        days_missing_weather += missing;
                        invoices_with_missing_weather += 1;
                    }
                    reconciled.push(row);
                }
                Err(reason) => dropped.push(DroppedInvoice {
                    invoice: invoice.clone(),
                    reason,
                }),
            }
        }

        let report = ReconciliationReport {
            reconciled,
            dropped,
            total_invoices: invoices.len(),
            days_missing_weather,
            invoices_with_missing_weather,
        };

        if report.unmatched_count() > 0 {
            warn!(
                invoices = report.unmatched_count(),
                parks = report.unmatched_parks().len(),
                "invoices dropped: park has no confident name match"
            );
        }
        if days_missing_weather > 0 {
            warn!(
                days = days_missing_weather,
                invoices = invoices_with_missing_weather,
                "weather gaps counted as zero need; estimates are low for these invoices"
            );
        }
        info!("{}", report.summary());

        report
    }
}

/// Reconcile invoices against matched green areas and a daily need series.
pub fn reconcile(
    invoices: &[InvoiceRecord],
    green_area_matches: &[GreenAreaMatch],
    daily_water_need: &[DailyWaterNeed],
) -> ReconciliationReport {
    let table = WaterNeedTable::from_daily(daily_water_need);
    InvoiceReconciler::new(green_area_matches, &table).reconcile_all(invoices)
}

// ============================================================================
// TESTS
// ============================================================================
