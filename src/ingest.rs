// 📥 Ingestion - Raw sources → typed records
// Green-area survey (xlsx or csv, header offset) and the municipal invoice
// ledger (csv). Malformed rows are filtered here and counted in IngestReport.

use crate::error::{PipelineError, PipelineResult};
use crate::normalize::{normalize_name, strip_owner_prefix, turkish_upper};
use calamine::{open_workbook_auto, Data, Reader};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Survey sheet column headers
pub const SERIAL_COLUMN: &str = "SIRA NO";
pub const PARK_NAME_COLUMN: &str = "PARK ADI";
pub const GRASS_AREA_COLUMN: &str = "ÇİM ALAN";

// ============================================================================
// RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreenAreaRecord {
    pub serial_no: u32,
    pub park_name: String,
    pub grass_area_m2: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub subscription_id: String,
    pub district: String,
    pub park_name: String,
    pub start_read_date: NaiveDate,
    pub end_read_date: NaiveDate,
    pub actual_volume_m3: i64,
}

impl InvoiceRecord {
    pub fn days(&self) -> i64 {
        (self.end_read_date - self.start_read_date).num_days() + 1
    }

    pub fn has_valid_period(&self) -> bool {
        self.start_read_date <= self.end_read_date
    }
}

/// What ingestion kept and what it threw away
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub rows_read: usize,
    pub kept: usize,
    pub invalid_serial: usize,
    pub invalid_area: usize,
    pub duplicate_names: usize,
    pub other_district: usize,
    pub invalid_date: usize,
    pub invalid_period: usize,
    pub invalid_volume: usize,

    /// Rows whose field count does not match the header
    pub malformed: usize,
}

impl IngestReport {
    pub fn dropped(&self) -> usize {
        self.rows_read - self.kept
    }
}

// ============================================================================
// CELL PARSING HELPERS
// ============================================================================

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{}", n)
            }
        }
        Data::Int(n) => n.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => format!("{}", dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(_) => String::new(),
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .parse::<f64>()
        .ok()
        .or_else(|| trimmed.replace(',', ".").parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

fn parse_serial(raw: &str) -> Option<u32> {
    parse_number(raw)
        .filter(|v| *v >= 0.0 && *v <= u32::MAX as f64)
        .map(|v| v.trunc() as u32)
}

/// Ledger dates come in a few shapes; the time part is ignored when present.
pub fn parse_read_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    for fmt in ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(date);
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d.%m.%Y %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt.date());
        }
    }
    None
}

fn find_column(header: &[String], wanted: &str, source: &str) -> PipelineResult<usize> {
    let wanted_norm = normalize_name(wanted);
    header
        .iter()
        .position(|h| h.trim() == wanted || normalize_name(h) == wanted_norm)
        .ok_or_else(|| PipelineError::invalid_input(source, format!("missing column '{}'", wanted)))
}

// ============================================================================
// GREEN-AREA SURVEY
// ============================================================================

/// Parse survey rows. `header_row` is the 0-based row holding the column names;
/// everything above it is title block.
///
/// Rows whose serial number is not numeric are dropped (totals, section
/// headings). A park listed twice keeps its first row.
pub fn parse_green_area_rows(
    rows: &[Vec<String>],
    header_row: usize,
    source: &str,
) -> PipelineResult<(Vec<GreenAreaRecord>, IngestReport)> {
    let header = rows
        .get(header_row)
        .ok_or_else(|| PipelineError::invalid_input(source, format!("no header at row {}", header_row)))?;

    let serial_idx = find_column(header, SERIAL_COLUMN, source)?;
    let name_idx = find_column(header, PARK_NAME_COLUMN, source)?;
    let area_idx = find_column(header, GRASS_AREA_COLUMN, source)?;

    let mut report = IngestReport::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut records = Vec::new();

    for row in rows.iter().skip(header_row + 1) {
        if row.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        report.rows_read += 1;

        let cell = |idx: usize| row.get(idx).map(String::as_str).unwrap_or("");

        let serial_no = match parse_serial(cell(serial_idx)) {
            Some(s) => s,
            None => {
                report.invalid_serial += 1;
                continue;
            }
        };

        let park_name = cell(name_idx).trim().to_string();
        let grass_area_m2 = match parse_number(cell(area_idx)) {
            Some(a) if !park_name.is_empty() => a,
            _ => {
                report.invalid_area += 1;
                debug!(serial_no, park = %park_name, "survey row without usable area");
                continue;
            }
        };

        if !seen.insert(park_name.clone()) {
            report.duplicate_names += 1;
            continue;
        }

        records.push(GreenAreaRecord {
            serial_no,
            park_name,
            grass_area_m2,
        });
    }

    report.kept = records.len();
    Ok((records, report))
}

fn read_sheet_rows(path: &Path) -> PipelineResult<Vec<Vec<String>>> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| PipelineError::Sheet(format!("failed to open {}: {}", path.display(), e)))?;

    let first = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| PipelineError::Sheet(format!("{} contains no sheets", path.display())))?;

    let range = workbook
        .worksheet_range(&first)
        .map_err(|e| PipelineError::Sheet(format!("failed to read sheet '{}': {}", first, e)))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect())
}

fn read_csv_rows(path: &Path) -> PipelineResult<Vec<Vec<String>>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        rows.push(record.iter().map(|s| s.to_string()).collect());
    }
    Ok(rows)
}

/// Load the green-area survey from `.xlsx`/`.xls`/`.ods` (first sheet) or `.csv`.
pub fn load_green_areas(
    path: &Path,
    header_row: usize,
) -> PipelineResult<(Vec<GreenAreaRecord>, IngestReport)> {
    let is_csv = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    let rows = if is_csv {
        read_csv_rows(path)?
    } else {
        read_sheet_rows(path)?
    };

    let (records, report) = parse_green_area_rows(&rows, header_row, &path.display().to_string())?;
    info!(
        path = %path.display(),
        kept = report.kept,
        invalid_serial = report.invalid_serial,
        invalid_area = report.invalid_area,
        duplicates = report.duplicate_names,
        "green-area survey loaded"
    );
    Ok((records, report))
}

// ============================================================================
// INVOICE LEDGER
// ============================================================================

/// Columns every ledger file must carry
pub const LEDGER_COLUMNS: [&str; 6] = [
    "subscription",
    "district",
    "name",
    "start_read_date",
    "end_read_date",
    "volume",
];

/// Ledger row as it sits in the csv. Unknown header columns are ignored.
#[derive(Debug, Deserialize)]
struct LedgerRow {
    subscription: String,
    district: String,
    name: String,
    start_read_date: String,
    end_read_date: String,
    volume: String,
}

/// How ledger rows are selected and cleaned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerFilter {
    /// Keep rows of this district only (compared after normalization)
    pub district: String,

    /// Owner text stripped from subscriber names
    pub owner_prefix: String,
}

impl Default for LedgerFilter {
    fn default() -> Self {
        LedgerFilter {
            district: "ÇANKAYA".to_string(),
            owner_prefix: crate::normalize::DEFAULT_OWNER_PREFIX.to_string(),
        }
    }
}

fn ledger_row_to_record(
    row: LedgerRow,
    filter: &LedgerFilter,
    district_norm: &str,
    report: &mut IngestReport,
) -> Option<InvoiceRecord> {
    if normalize_name(&row.district) != district_norm {
        report.other_district += 1;
        return None;
    }

    let (start, end) = match (parse_read_date(&row.start_read_date), parse_read_date(&row.end_read_date)) {
        (Some(s), Some(e)) => (s, e),
        _ => {
            report.invalid_date += 1;
            return None;
        }
    };
    if start > end {
        report.invalid_period += 1;
        warn!(subscription = %row.subscription, %start, %end, "invoice period runs backwards");
        return None;
    }

    let volume = match parse_number(&row.volume) {
        Some(v) => v.trunc() as i64,
        None => {
            report.invalid_volume += 1;
            return None;
        }
    };

    Some(InvoiceRecord {
        subscription_id: row.subscription.trim().to_string(),
        district: row.district.trim().to_string(),
        park_name: strip_owner_prefix(&row.name, &filter.owner_prefix),
        start_read_date: start,
        end_read_date: end,
        actual_volume_m3: volume,
    })
}

/// Read ledger rows from any csv source (headers are whitespace-trimmed).
pub fn read_invoices<R: std::io::Read>(
    reader: R,
    filter: &LedgerFilter,
) -> PipelineResult<(Vec<InvoiceRecord>, IngestReport)> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    if let Some(missing) = LEDGER_COLUMNS.iter().find(|c| !headers.iter().any(|h| h == **c)) {
        return Err(PipelineError::invalid_input(
            "invoice ledger",
            format!("missing column '{}'", missing),
        ));
    }
    let district_norm = normalize_name(&filter.district);
    let mut report = IngestReport::default();
    let mut invoices = Vec::new();

    for result in rdr.records() {
        let record = match result {
            Ok(record) => record,
            Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => return Err(e.into()),
            Err(e) => {
                report.rows_read += 1;
                report.malformed += 1;
                warn!(error = %e, "unreadable ledger row skipped");
                continue;
            }
        };
        report.rows_read += 1;

        if record.len() != headers.len() {
            report.malformed += 1;
            warn!(
                line = record.position().map(|p| p.line()),
                fields = record.len(),
                expected = headers.len(),
                "ragged ledger row skipped"
            );
            continue;
        }
        let row: LedgerRow = match record.deserialize(Some(&headers)) {
            Ok(row) => row,
            Err(e) => {
                report.malformed += 1;
                warn!(error = %e, "ledger row does not fit the expected columns");
                continue;
            }
        };

        if let Some(invoice) = ledger_row_to_record(row, filter, &district_norm, &mut report) {
            invoices.push(invoice);
        }
    }

    report.kept = invoices.len();
    Ok((invoices, report))
}

pub fn load_invoices(
    path: &Path,
    filter: &LedgerFilter,
) -> PipelineResult<(Vec<InvoiceRecord>, IngestReport)> {
    let file = std::fs::File::open(path)?;
    let (invoices, report) = read_invoices(file, filter)?;
    info!(
        path = %path.display(),
        kept = report.kept,
        other_district = report.other_district,
        invalid_date = report.invalid_date,
        invalid_period = report.invalid_period,
        invalid_volume = report.invalid_volume,
        malformed = report.malformed,
        "invoice ledger loaded"
    );
    Ok((invoices, report))
}

// ============================================================================
// Irrigation schedule
// ============================================================================

pub const IRRIGATION_NAME_COLUMN: &str = "name";

/// Irrigation schedule row. The park name is upper-cased the Turkish way so it
/// lines up with ledger names; the other columns are kept as read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrrigationRecord {
    pub park_name: String,
    pub fields: Vec<(String, String)>,
}

pub fn read_irrigation<R: std::io::Read>(
    reader: R,
) -> PipelineResult<(Vec<IrrigationRecord>, IngestReport)> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let name_idx = headers
        .iter()
        .position(|h| h == IRRIGATION_NAME_COLUMN)
        .ok_or_else(|| {
            PipelineError::invalid_input(
                "irrigation schedule",
                format!("missing column '{}'", IRRIGATION_NAME_COLUMN),
            )
        })?;

    let mut report = IngestReport::default();
    let mut records = Vec::new();

    for result in rdr.records() {
        let record = match result {
            Ok(record) => record,
            Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => return Err(e.into()),
            Err(e) => {
                report.rows_read += 1;
                report.malformed += 1;
                warn!(error = %e, "unreadable irrigation row skipped");
                continue;
            }
        };
        report.rows_read += 1;

        let name = record.get(name_idx).map(str::trim).unwrap_or("");
        if record.len() != headers.len() || name.is_empty() {
            report.malformed += 1;
            debug!(line = record.position().map(|p| p.line()), "irrigation row skipped");
            continue;
        }

        let fields = headers
            .iter()
            .zip(record.iter())
            .enumerate()
            .filter(|(i, _)| *i != name_idx)
            .map(|(_, (h, v))| (h.to_string(), v.to_string()))
            .collect();
        records.push(IrrigationRecord {
            park_name: turkish_upper(name),
            fields,
        });
    }

    report.kept = records.len();
    Ok((records, report))
}

pub fn load_irrigation(path: &Path) -> PipelineResult<(Vec<IrrigationRecord>, IngestReport)> {
    let file = std::fs::File::open(path)?;
    let (records, report) = read_irrigation(file)?;
    info!(
        path = %path.display(),
        kept = report.kept,
        malformed = report.malformed,
        "irrigation schedule loaded"
    );
    Ok((records, report))
}

// ============================================================================
// TESTS
// ============================================================================
