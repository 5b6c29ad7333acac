// 📤 Output - Flat files consumed by the dashboard
// Column names and types here are a compatibility contract with downstream
// readers; do not rename or reorder.

use crate::error::PipelineResult;
use crate::matcher::NameMatch;
use crate::reconciliation::{difference_pct, ReconciledInvoice};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;
use tracing::info;

/// One line of the reconciled invoice file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledRow {
    pub subscription: String,
    pub name: String,
    pub start_read_date: NaiveDate,
    pub end_read_date: NaiveDate,
    /// Truncated toward zero
    pub estimated_volume: i64,
    pub volume: i64,
    pub grass_area: f64,
}

impl From<&ReconciledInvoice> for ReconciledRow {
    fn from(r: &ReconciledInvoice) -> Self {
        ReconciledRow {
            subscription: r.subscription_id.clone(),
            name: r.park_name.clone(),
            start_read_date: r.start_read_date,
            end_read_date: r.end_read_date,
            estimated_volume: r.estimated_volume_m3.trunc() as i64,
            volume: r.actual_volume_m3,
            grass_area: r.grass_area_m2,
        }
    }
}

impl From<ReconciledRow> for ReconciledInvoice {
    /// Differences are recomputed from the integer columns, as the file's readers do.
    fn from(row: ReconciledRow) -> Self {
        let estimated = row.estimated_volume as f64;
        let difference_m3 = (row.volume - row.estimated_volume) as f64;
        ReconciledInvoice {
            subscription_id: row.subscription,
            park_name: row.name,
            start_read_date: row.start_read_date,
            end_read_date: row.end_read_date,
            actual_volume_m3: row.volume,
            estimated_volume_m3: estimated,
            grass_area_m2: row.grass_area,
            difference_m3,
            difference_pct: difference_pct(difference_m3, estimated),
        }
    }
}

/// Name-matching audit line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRow {
    pub name_1: String,
    pub name_2: String,
    pub score: f64,
}

// ============================================================================
// WRITERS
// ============================================================================

pub fn write_reconciled<W: Write>(writer: W, invoices: &[ReconciledInvoice]) -> PipelineResult<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for invoice in invoices {
        wtr.serialize(ReconciledRow::from(invoice))?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_matches<W: Write>(writer: W, matches: &[NameMatch]) -> PipelineResult<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for m in matches {
        wtr.serialize(MatchRow {
            name_1: m.source_name.clone(),
            name_2: m.target_name.clone(),
            score: m.score,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

fn create_file(path: &Path) -> PipelineResult<std::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(std::fs::File::create(path)?)
}

pub fn save_reconciled(path: &Path, invoices: &[ReconciledInvoice]) -> PipelineResult<()> {
    write_reconciled(create_file(path)?, invoices)?;
    info!(path = %path.display(), rows = invoices.len(), "reconciled invoices written");
    Ok(())
}

pub fn save_matches(path: &Path, matches: &[NameMatch]) -> PipelineResult<()> {
    write_matches(create_file(path)?, matches)?;
    info!(path = %path.display(), rows = matches.len(), "name matches written");
    Ok(())
}

// ============================================================================
// READER
// ============================================================================

pub fn read_reconciled<R: Read>(reader: R) -> PipelineResult<Vec<ReconciledInvoice>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: ReconciledRow = result?;
        rows.push(ReconciledInvoice::from(row));
    }
    Ok(rows)
}

pub fn load_reconciled(path: &Path) -> PipelineResult<Vec<ReconciledInvoice>> {
    read_reconciled(std::fs::File::open(path)?)
}

// ============================================================================
// TESTS
// ============================================================================
