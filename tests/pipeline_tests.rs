//! Pipeline integration tests
//!
//! File in → file out with an offline climate source:
//! - survey sheet with a title block above the header
//! - ledger with padded headers, foreign district, owner prefix, bad period
//! - reconciled CSV contract and SQLite re-run behaviour

use chrono::{Duration, NaiveDate};
use park_water::db;
use park_water::{
    load_reconciled, ClimateSource, Coordinates, DailyClimate, DailySeries, PipelineConfig,
    PipelineContext, PipelineError, PipelineResult,
};
use proptest::prelude::*;
use std::fs;
use std::path::Path;

/// T̄ = 25 °C, u = 2 m/s, RH = 50 %, Rs = 20 MJ every day
struct SteadyClimate;

impl ClimateSource for SteadyClimate {
    fn fetch_climate(&self, _: Coordinates, start: NaiveDate, end: NaiveDate) -> PipelineResult<DailySeries> {
        let mut days = Vec::new();
        let mut date = start;
        while date <= end {
            days.push(DailyClimate {
                date,
                temp_max_c: 30.0,
                temp_min_c: 20.0,
                wind_speed_max_ms: 2.0,
                relative_humidity_max_pct: 50.0,
                shortwave_radiation_mj: 20.0,
            });
            date += Duration::days(1);
        }
        Ok(DailySeries { days })
    }
}

struct UnreachableArchive;

impl ClimateSource for UnreachableArchive {
    fn fetch_climate(&self, _: Coordinates, _: NaiveDate, _: NaiveDate) -> PipelineResult<DailySeries> {
        Err(PipelineError::UpstreamUnavailable("connection refused".to_string()))
    }
}

const SURVEY: &str = "\
ÇANKAYA BELEDİYESİ PARK VE BAHÇELER,,
2023 YEŞİL ALAN ENVANTERİ,,
,,
,,
SIRA NO,PARK ADI,ÇİM ALAN
1,Güven Parkı,1000
2,Kuğulu Park,\"1250,5\"
TOPLAM,,2250.5
";

const LEDGER: &str = "\
 subscription , district ,name, start_read_date ,end_read_date, volume
1001,ÇANKAYA,ÇANKAYA BELEDİYESİ GÜVEN PARKI,2023-06-01,2023-06-30,450
1002,ÇANKAYA,ÇANKAYA BELEDİYESİ KUĞULU PARK,2023-06-01,2023-06-30,300
1003,ÇANKAYA,ÇANKAYA BELEDİYESİ SEĞMENLER PARKI,2023-06-01,2023-06-30,120
1004,KEÇİÖREN,KEÇİÖREN BELEDİYESİ GÜVEN PARKI,2023-06-01,2023-06-30,99
1005,ÇANKAYA,ÇANKAYA BELEDİYESİ GÜVEN PARKI,2023-07-10,2023-07-01,10
";

fn create_test_config(dir: &Path) -> PipelineConfig {
    fs::write(dir.join("ca_area.csv"), SURVEY).unwrap();
    fs::write(dir.join("all_invoice.csv"), LEDGER).unwrap();

    let mut config = PipelineConfig::default();
    config.weather.elevation_m = 900.0;
    config.paths.green_areas = dir.join("ca_area.csv");
    config.paths.invoices = dir.join("all_invoice.csv");
    config.paths.reconciled_output = dir.join("final").join("ca_invoice.csv");
    config.paths.matches_output = dir.join("final").join("ca_name_matching.csv");
    config.paths.store = Some(dir.join("runs.db"));
    config
}

// ============================================================================
// End-to-end
// ============================================================================

#[test]
fn test_run_from_files_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = PipelineContext::new(create_test_config(dir.path()), Box::new(SteadyClimate));

    let result = ctx.run_from_files().unwrap();

    assert_eq!(result.green_area_report.kept, 2);
    assert_eq!(result.green_area_report.invalid_serial, 1);
    assert_eq!(result.invoice_report.kept, 3);
    assert_eq!(result.invoice_report.other_district, 1);
    assert_eq!(result.invoice_report.invalid_period, 1);

    let report = &result.outcome.reconciliation;
    assert_eq!(report.total_invoices, 3);
    assert_eq!(report.reconciled.len(), 2);
    assert_eq!(report.unmatched_parks(), vec!["SEĞMENLER PARKI".to_string()]);

    // ET0 7.2951 mm · kc 0.8 → 0.0058 m³/m²/day, 30 days, 1000 m²
    let guven = report
        .reconciled
        .iter()
        .find(|r| r.park_name == "GÜVEN PARKI")
        .unwrap();
    assert!((guven.estimated_volume_m3 - 174.0).abs() < 1e-6, "got {}", guven.estimated_volume_m3);
    assert!((guven.difference_m3 - 276.0).abs() < 1e-6);

    let text = fs::read_to_string(dir.path().join("final").join("ca_invoice.csv")).unwrap();
    assert!(text.starts_with(
        "subscription,name,start_read_date,end_read_date,estimated_volume,volume,grass_area\n"
    ));
    let expected_line = format!(
        "1001,GÜVEN PARKI,2023-06-01,2023-06-30,{},450,1000.0",
        guven.estimated_volume_m3.trunc() as i64
    );
    assert!(text.contains(&expected_line), "{}", text);

    let read_back = load_reconciled(&dir.path().join("final").join("ca_invoice.csv")).unwrap();
    assert_eq!(read_back.len(), 2);

    let matches = fs::read_to_string(dir.path().join("final").join("ca_name_matching.csv")).unwrap();
    assert!(matches.starts_with("name_1,name_2,score\n"));
    assert_eq!(matches.lines().count(), 3);

    println!("✅ End-to-end pipeline test PASSED");
}

#[test]
fn test_rerun_updates_store_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = PipelineContext::new(create_test_config(dir.path()), Box::new(SteadyClimate));

    let first = ctx.run_from_files().unwrap();
    let second = ctx.run_from_files().unwrap();

    assert_eq!(first.store_stats.unwrap().inserted, 2);
    let stats = second.store_stats.unwrap();
    assert_eq!(stats.inserted, 0);
    assert_eq!(stats.unchanged, 2);
    assert_ne!(first.run_id, second.run_id);

    let conn = db::open_store(&dir.path().join("runs.db")).unwrap();
    assert_eq!(db::count_reconciled(&conn).unwrap(), 2);
    assert_eq!(db::count_runs(&conn).unwrap(), 2);

    let run = db::get_run(&conn, second.run_id.as_deref().unwrap()).unwrap().unwrap();
    assert_eq!(run.reconciled, 2);
    assert_eq!(run.unmatched, 1);

    println!("✅ Re-run store test PASSED");
}

#[test]
fn test_unreachable_archive_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = PipelineContext::new(create_test_config(dir.path()), Box::new(UnreachableArchive));

    let err = ctx.run_from_files().unwrap_err();
    assert!(err.is_upstream());
    assert!(!dir.path().join("final").join("ca_invoice.csv").exists());
    assert!(!dir.path().join("runs.db").exists());
}

#[test]
fn test_unfolded_names_match_less() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(dir.path());
    config.matching.normalize_names = false;
    let ctx = PipelineContext::new(config, Box::new(SteadyClimate));

    // without folding, "Güven Parkı" and "GÜVEN PARKI" tokenize differently
    let result = ctx.run_from_files().unwrap();
    assert!(result.outcome.reconciliation.reconciled.len() < 2);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Every loaded invoice is either reconciled or dropped with a reason
    #[test]
    fn prop_every_invoice_accounted_for(volumes in prop::collection::vec(0i64..5000, 1..20)) {
        let ctx = PipelineContext::new(PipelineConfig::default(), Box::new(SteadyClimate));
        let start = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
        let parks = vec![park_water::GreenAreaRecord {
            serial_no: 1,
            park_name: "Güven Parkı".to_string(),
            grass_area_m2: 1000.0,
        }];
        let invoices: Vec<_> = volumes
            .iter()
            .enumerate()
            .map(|(i, v)| park_water::InvoiceRecord {
                subscription_id: i.to_string(),
                district: "ÇANKAYA".to_string(),
                park_name: if i % 3 == 0 { "BİLİNMEYEN PARK".to_string() } else { "GÜVEN PARKI".to_string() },
                start_read_date: start,
                end_read_date: start + Duration::days(29),
                actual_volume_m3: *v,
            })
            .collect();

        let report = ctx.run(&parks, &invoices).unwrap().reconciliation;
        prop_assert_eq!(report.reconciled.len() + report.dropped.len(), invoices.len());
        prop_assert_eq!(report.unmatched_count(), invoices.len().div_ceil(3));
    }
}
