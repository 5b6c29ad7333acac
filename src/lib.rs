// Park Water - Core Library
// Reconciles billed park irrigation water against weather-based estimates.
// Exposes all modules for use in the CLI and tests.

pub mod error;
pub mod normalize;
pub mod weather;        // Penman–Monteith ET0 + daily water need
pub mod matcher;        // TF-IDF park name matching
pub mod ingest;         // survey sheet + invoice ledger loaders
pub mod reconciliation; // per-invoice estimate vs. billed volume
pub mod summary;        // dashboard aggregates
pub mod output;         // flat-file contract
pub mod db;             // SQLite run store
pub mod config;
pub mod pipeline;

// Re-export commonly used types
pub use error::{PipelineError, PipelineResult};
pub use normalize::{normalize_name, strip_owner_prefix, turkish_upper};
pub use weather::{
    compute_et0, estimate_water_need, water_need_from_series,
    ClimateSource, Coordinates, DailyClimate, DailySeries, DailyWaterNeed,
    IrrigationSeason, OpenMeteoClient, WaterNeedParams, WaterNeedTable,
};
pub use matcher::{best_matches, best_matches_raw, filter_matches, MatchOutcome, NameMatch, NameMatcher};
pub use ingest::{
    load_green_areas, load_invoices, load_irrigation, read_invoices, read_irrigation,
    GreenAreaRecord, IngestReport, InvoiceRecord, IrrigationRecord, LedgerFilter,
};
pub use reconciliation::{
    join_matches, reconcile, DroppedInvoice, GreenAreaMatch, InvoiceReconciler,
    ReconciledInvoice, ReconciliationReport, UnmatchedReason,
};
pub use summary::{kpi_summary, monthly_series, InvoiceFilter, KpiSummary, MonthlyVolume};
pub use output::{load_reconciled, save_matches, save_reconciled};
pub use db::{RunRecord, UpsertStats};
pub use crate::config::PipelineConfig;
pub use pipeline::{FileRunOutcome, PipelineContext, PipelineOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
