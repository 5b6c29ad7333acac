//! Pipeline configuration
//!
//! Layered loading:
//! 1. Defaults in code (the values the municipal runs have always used)
//! 2. Optional TOML/JSON/YAML file
//! 3. Environment overrides with `PARK_WATER__` prefix, e.g.
//!    `PARK_WATER__MATCHING__SIMILARITY_THRESHOLD=0.9`

use crate::error::{PipelineError, PipelineResult};
use crate::ingest::LedgerFilter;
use crate::weather::{Coordinates, IrrigationSeason, WaterNeedParams};
use chrono::NaiveDate;
use config::{Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on weather fetch retries; backoff doubles per retry
pub const MAX_RETRIES: u32 = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub matching: MatchingConfig,
    pub weather: WeatherConfig,
    pub ingest: IngestConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Matches must score strictly above this
    pub similarity_threshold: f64,

    /// Fold case/diacritics before matching
    pub normalize_names: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_m: f64,
    pub crop_coefficient: f64,

    /// When false, water need is estimated every day of the year
    pub seasonal: bool,
    pub season_first_month: u32,
    pub season_last_month: u32,

    /// Fixed weather span; when unset the span of the loaded invoices is used
    pub span_start: Option<NaiveDate>,
    pub span_end: Option<NaiveDate>,

    pub archive_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// 0-based row of the survey sheet header
    pub green_area_header_row: usize,
    pub district: String,
    pub owner_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub green_areas: PathBuf,
    pub invoices: PathBuf,
    pub reconciled_output: PathBuf,
    pub matches_output: PathBuf,

    /// SQLite run store; disabled when unset
    pub store: Option<PathBuf>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        MatchingConfig {
            similarity_threshold: 0.95,
            normalize_names: true,
        }
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        // Çankaya, Ankara
        WeatherConfig {
            latitude: 39.9208,
            longitude: 32.8541,
            elevation_m: 900.0,
            crop_coefficient: 0.8,
            seasonal: true,
            season_first_month: 6,
            season_last_month: 10,
            span_start: None,
            span_end: None,
            archive_url: crate::weather::DEFAULT_ARCHIVE_URL.to_string(),
            timeout_secs: 30,
            max_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        let ledger = LedgerFilter::default();
        IngestConfig {
            green_area_header_row: 4,
            district: ledger.district,
            owner_prefix: ledger.owner_prefix,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            green_areas: PathBuf::from("data/raw/ca_area.xlsx"),
            invoices: PathBuf::from("data/raw/all_invoice.csv"),
            reconciled_output: PathBuf::from("data/final/ca_invoice.csv"),
            matches_output: PathBuf::from("data/final/ca_name_matching.csv"),
            store: None,
        }
    }
}

impl PipelineConfig {
    /// Load from an optional file plus environment overrides, then validate.
    pub fn load(file: Option<&Path>) -> PipelineResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        } else {
            builder = builder.add_source(File::with_name("park-water").required(false));
        }

        let cfg: PipelineConfig = builder
            .add_source(
                Environment::with_prefix("PARK_WATER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let bad = |msg: String| Err(PipelineError::invalid_input("configuration", msg));

        if !(0.0..=1.0).contains(&self.matching.similarity_threshold) {
            return bad(format!(
                "similarity_threshold must be within [0, 1], got {}",
                self.matching.similarity_threshold
            ));
        }
        if !(self.weather.crop_coefficient > 0.0) {
            return bad(format!(
                "crop_coefficient must be positive, got {}",
                self.weather.crop_coefficient
            ));
        }
        for month in [self.weather.season_first_month, self.weather.season_last_month] {
            if !(1..=12).contains(&month) {
                return bad(format!("season month out of range: {}", month));
            }
        }
        if self.weather.max_retries > MAX_RETRIES {
            return bad(format!(
                "max_retries must be at most {}, got {}",
                MAX_RETRIES, self.weather.max_retries
            ));
        }
        if let (Some(start), Some(end)) = (self.weather.span_start, self.weather.span_end) {
            if start > end {
                return bad(format!("weather span {} → {} runs backwards", start, end));
            }
        }
        Ok(())
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            lat: self.weather.latitude,
            lon: self.weather.longitude,
        }
    }

    pub fn season(&self) -> IrrigationSeason {
        if self.weather.seasonal {
            IrrigationSeason::Months {
                first: self.weather.season_first_month,
                last: self.weather.season_last_month,
            }
        } else {
            IrrigationSeason::AllYear
        }
    }

    /// Per-unit-area parameters; grass area scaling happens in the reconciler.
    pub fn water_need_params(&self) -> WaterNeedParams {
        WaterNeedParams {
            reference_area_m2: 1.0,
            crop_coefficient: self.weather.crop_coefficient,
            elevation_m: self.weather.elevation_m,
            season: self.season(),
        }
    }

    pub fn ledger_filter(&self) -> LedgerFilter {
        LedgerFilter {
            district: self.ingest.district.clone(),
            owner_prefix: self.ingest.owner_prefix.clone(),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.weather.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.weather.retry_backoff_ms)
    }
}
