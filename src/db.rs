// 🗄️ Run Store - SQLite persistence of pipeline runs
// One row per run plus the reconciled invoices it produced. Invoices are keyed
// by an idempotency hash over subscription + read period, so re-running the
// pipeline over the same ledger revises rows in place instead of duplicating.

use crate::error::PipelineResult;
use crate::reconciliation::{ReconciledInvoice, ReconciliationReport};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info};

/// Deduplication key for a reconciled invoice.
/// Identity of a run is its UUID; identity of an invoice row is this hash.
pub fn compute_idempotency_hash(invoice: &ReconciledInvoice) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{}|{}|{}",
        invoice.subscription_id.trim(),
        invoice.start_read_date,
        invoice.end_read_date
    ));
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// RUN RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Effective configuration of the run
    pub config: serde_json::Value,

    pub total_invoices: usize,
    pub reconciled: usize,
    pub unmatched: usize,
    pub invalid_period: usize,
    pub days_missing_weather: usize,
}

impl RunRecord {
    pub fn start(config: serde_json::Value) -> Self {
        RunRecord {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            config,
            total_invoices: 0,
            reconciled: 0,
            unmatched: 0,
            invalid_period: 0,
            days_missing_weather: 0,
        }
    }

    /// Copy the report's counts and stamp the finish time
    pub fn finish(&mut self, report: &ReconciliationReport) {
        self.finished_at = Some(Utc::now());
        self.total_invoices = report.total_invoices;
        self.reconciled = report.reconciled.len();
        self.unmatched = report.unmatched_count();
        self.invalid_period = report.invalid_period_count();
        self.days_missing_weather = report.days_missing_weather;
    }
}

/// Audit trail entry
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(event_type: &str, entity_type: &str, entity_id: &str, data: serde_json::Value) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
        }
    }
}

/// What an upsert did to each row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertStats {
    pub inserted: usize,
    pub revised: usize,
    pub unchanged: usize,
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn open_store(path: &Path) -> PipelineResult<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> PipelineResult<()> {
    // WAL for crash recovery; in-memory databases silently keep "memory"
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            config TEXT NOT NULL,
            total_invoices INTEGER NOT NULL,
            reconciled INTEGER NOT NULL,
            unmatched INTEGER NOT NULL,
            invalid_period INTEGER NOT NULL,
            days_missing_weather INTEGER NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS reconciled_invoices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            idempotency_hash TEXT UNIQUE NOT NULL,
            run_id TEXT NOT NULL,
            subscription_id TEXT NOT NULL,
            park_name TEXT NOT NULL,
            start_read_date TEXT NOT NULL,
            end_read_date TEXT NOT NULL,
            actual_volume_m3 INTEGER NOT NULL,
            estimated_volume_m3 REAL NOT NULL,
            grass_area_m2 REAL NOT NULL,
            difference_m3 REAL NOT NULL,
            difference_pct REAL NOT NULL,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_invoices_park ON reconciled_invoices(park_name)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_invoices_start ON reconciled_invoices(start_read_date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// WRITES
// ============================================================================

pub fn insert_run(conn: &Connection, run: &RunRecord) -> PipelineResult<()> {
    conn.execute(
        "INSERT INTO runs (
            run_id, started_at, finished_at, config, total_invoices,
            reconciled, unmatched, invalid_period, days_missing_weather
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            run.run_id,
            run.started_at.to_rfc3339(),
            run.finished_at.map(|t| t.to_rfc3339()),
            serde_json::to_string(&run.config)?,
            run.total_invoices as i64,
            run.reconciled as i64,
            run.unmatched as i64,
            run.invalid_period as i64,
            run.days_missing_weather as i64,
        ],
    )?;
    Ok(())
}

/// Insert new rows; rows already present are revised only when a value changed.
pub fn upsert_reconciled(
    conn: &Connection,
    run_id: &str,
    invoices: &[ReconciledInvoice],
) -> PipelineResult<UpsertStats> {
    let tx = conn.unchecked_transaction()?;
    let mut stats = UpsertStats::default();

    for invoice in invoices {
        let hash = compute_idempotency_hash(invoice);
        let start = invoice.start_read_date.to_string();
        let end = invoice.end_read_date.to_string();

        let result = tx.execute(
            "INSERT INTO reconciled_invoices (
                idempotency_hash, run_id, subscription_id, park_name,
                start_read_date, end_read_date, actual_volume_m3,
                estimated_volume_m3, grass_area_m2, difference_m3, difference_pct
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                hash,
                run_id,
                invoice.subscription_id,
                invoice.park_name,
                start,
                end,
                invoice.actual_volume_m3,
                invoice.estimated_volume_m3,
                invoice.grass_area_m2,
                invoice.difference_m3,
                invoice.difference_pct,
            ],
        );

        match result {
            Ok(_) => stats.inserted += 1,
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                let changed = tx.execute(
                    "UPDATE reconciled_invoices SET
                        run_id = ?2, park_name = ?3, actual_volume_m3 = ?4,
                        estimated_volume_m3 = ?5, grass_area_m2 = ?6,
                        difference_m3 = ?7, difference_pct = ?8,
                        updated_at = CURRENT_TIMESTAMP
                     WHERE idempotency_hash = ?1
                       AND (park_name != ?3 OR actual_volume_m3 != ?4
                            OR estimated_volume_m3 != ?5 OR grass_area_m2 != ?6)",
                    params![
                        hash,
                        run_id,
                        invoice.park_name,
                        invoice.actual_volume_m3,
                        invoice.estimated_volume_m3,
                        invoice.grass_area_m2,
                        invoice.difference_m3,
                        invoice.difference_pct,
                    ],
                )?;

                if changed > 0 {
                    stats.revised += 1;
                    insert_event(
                        &tx,
                        &Event::new(
                            "invoice_revised",
                            "reconciled_invoice",
                            &hash,
                            serde_json::json!({
                                "run_id": run_id,
                                "subscription": invoice.subscription_id,
                                "estimated_volume_m3": invoice.estimated_volume_m3,
                            }),
                        ),
                    )?;
                } else {
                    stats.unchanged += 1;
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    tx.commit()?;
    debug!(?stats, "reconciled invoices upserted");
    Ok(stats)
}

/// Persist a finished run and its rows in one call.
pub fn save_run(
    conn: &Connection,
    run: &RunRecord,
    invoices: &[ReconciledInvoice],
) -> PipelineResult<UpsertStats> {
    insert_run(conn, run)?;
    let stats = upsert_reconciled(conn, &run.run_id, invoices)?;

    insert_event(
        conn,
        &Event::new(
            "run_completed",
            "run",
            &run.run_id,
            serde_json::json!({
                "inserted": stats.inserted,
                "revised": stats.revised,
                "unchanged": stats.unchanged,
            }),
        ),
    )?;

    info!(
        run_id = %run.run_id,
        inserted = stats.inserted,
        revised = stats.revised,
        unchanged = stats.unchanged,
        "run stored"
    );
    Ok(stats)
}

pub fn insert_event(conn: &Connection, event: &Event) -> PipelineResult<()> {
    conn.execute(
        "INSERT INTO events (event_id, timestamp, event_type, entity_type, entity_id, data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            serde_json::to_string(&event.data)?,
        ],
    )?;
    Ok(())
}

// ============================================================================
// READS
// ============================================================================

fn text_column_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_date_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| text_column_error(idx, e))
}

fn parse_time_column(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| text_column_error(idx, e))
}

/// Every stored invoice, oldest read period first
pub fn get_reconciled(conn: &Connection) -> PipelineResult<Vec<ReconciledInvoice>> {
    let mut stmt = conn.prepare(
        "SELECT subscription_id, park_name, start_read_date, end_read_date,
                actual_volume_m3, estimated_volume_m3, grass_area_m2,
                difference_m3, difference_pct
         FROM reconciled_invoices
         ORDER BY start_read_date, subscription_id",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok(ReconciledInvoice {
                subscription_id: row.get(0)?,
                park_name: row.get(1)?,
                start_read_date: parse_date_column(row, 2)?,
                end_read_date: parse_date_column(row, 3)?,
                actual_volume_m3: row.get(4)?,
                estimated_volume_m3: row.get(5)?,
                grass_area_m2: row.get(6)?,
                difference_m3: row.get(7)?,
                difference_pct: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

pub fn get_run(conn: &Connection, run_id: &str) -> PipelineResult<Option<RunRecord>> {
    let row = conn
        .query_row(
            "SELECT run_id, started_at, finished_at, config, total_invoices,
                    reconciled, unmatched, invalid_period, days_missing_weather
             FROM runs WHERE run_id = ?1",
            params![run_id],
            |row| {
                let started: String = row.get(1)?;
                let finished: Option<String> = row.get(2)?;
                let config: String = row.get(3)?;
                Ok(RunRecord {
                    run_id: row.get(0)?,
                    started_at: parse_time_column(&started, 1)?,
                    finished_at: finished.as_deref().map(|t| parse_time_column(t, 2)).transpose()?,
                    config: serde_json::from_str(&config).map_err(|e| text_column_error(3, e))?,
                    total_invoices: row.get::<_, i64>(4)? as usize,
                    reconciled: row.get::<_, i64>(5)? as usize,
                    unmatched: row.get::<_, i64>(6)? as usize,
                    invalid_period: row.get::<_, i64>(7)? as usize,
                    days_missing_weather: row.get::<_, i64>(8)? as usize,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn count_runs(conn: &Connection) -> PipelineResult<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?)
}

pub fn count_reconciled(conn: &Connection) -> PipelineResult<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM reconciled_invoices", [], |row| row.get(0))?)
}

pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> PipelineResult<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp: String = row.get(1)?;
            let data: String = row.get(5)?;
            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_time_column(&timestamp, 1)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data).map_err(|e| text_column_error(5, e))?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_invoice(subscription: &str, month: u32, estimated: f64) -> ReconciledInvoice {
        let start = NaiveDate::from_ymd_opt(2023, month, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2023, month, 28).unwrap();
        let actual = 300;
        let difference_m3 = actual as f64 - estimated;
        ReconciledInvoice {
            subscription_id: subscription.to_string(),
            park_name: "GÜVEN PARKI".to_string(),
            start_read_date: start,
            end_read_date: end,
            actual_volume_m3: actual,
            estimated_volume_m3: estimated,
            grass_area_m2: 1000.0,
            difference_m3,
            difference_pct: crate::reconciliation::difference_pct(difference_m3, estimated),
        }
    }

    fn create_test_store() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_rerun_does_not_duplicate() {
        let conn = create_test_store();
        let invoices = vec![
            create_test_invoice("1001", 6, 250.0),
            create_test_invoice("1001", 7, 280.0),
            create_test_invoice("1002", 6, 90.0),
        ];

        let first = RunRecord::start(serde_json::json!({}));
        let stats1 = save_run(&conn, &first, &invoices).unwrap();
        let second = RunRecord::start(serde_json::json!({}));
        let stats2 = save_run(&conn, &second, &invoices).unwrap();

        assert_eq!(stats1.inserted, 3);
        assert_eq!(stats2.inserted, 0);
        assert_eq!(stats2.unchanged, 3);
        assert_eq!(count_reconciled(&conn).unwrap(), 3);
        assert_eq!(count_runs(&conn).unwrap(), 2);

        println!("✅ Re-run idempotency test PASSED");
    }

    #[test]
    fn test_changed_estimate_is_revised() {
        let conn = create_test_store();
        upsert_reconciled(&conn, "run-a", &[create_test_invoice("1001", 6, 250.0)]).unwrap();

        let revised = create_test_invoice("1001", 6, 260.0);
        let stats = upsert_reconciled(&conn, "run-b", &[revised.clone()]).unwrap();
        assert_eq!(stats.revised, 1);

        let stored = get_reconciled(&conn).unwrap();
        assert_eq!(stored, vec![revised.clone()]);

        let hash = compute_idempotency_hash(&revised);
        let events = get_events_for_entity(&conn, "reconciled_invoice", &hash).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "invoice_revised");

        println!("✅ Revision test PASSED");
    }

    #[test]
    fn test_idempotency_hash_ignores_values() {
        let a = create_test_invoice("1001", 6, 250.0);
        let b = create_test_invoice("1001", 6, 999.0);
        let c = create_test_invoice("1001", 7, 250.0);

        assert_eq!(compute_idempotency_hash(&a), compute_idempotency_hash(&b));
        assert_ne!(compute_idempotency_hash(&a), compute_idempotency_hash(&c));
        assert_eq!(compute_idempotency_hash(&a).len(), 64);
    }

    #[test]
    fn test_run_record_round_trip() {
        let conn = create_test_store();
        let mut run = RunRecord::start(serde_json::json!({"matching": {"similarity_threshold": 0.95}}));
        run.finish(&ReconciliationReport {
            reconciled: vec![create_test_invoice("1001", 6, 250.0)],
            dropped: vec![],
            total_invoices: 2,
            days_missing_weather: 3,
            invoices_with_missing_weather: 1,
        });
        insert_run(&conn, &run).unwrap();

        let stored = get_run(&conn, &run.run_id).unwrap().unwrap();
        assert_eq!(stored.reconciled, 1);
        assert_eq!(stored.total_invoices, 2);
        assert_eq!(stored.days_missing_weather, 3);
        assert_eq!(stored.config, run.config);
        assert!(stored.finished_at.is_some());

        assert!(get_run(&conn, "missing").unwrap().is_none());
    }
}
