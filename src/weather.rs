// 🌦️ Weather Estimator - Daily climate → ET0 → water need
// FAO-56 Penman–Monteith reference evapotranspiration, scaled by a crop
// coefficient and converted from mm over an area to cubic meters.
//
// The climate archive is fetched ONCE per pipeline run and turned into a
// date-indexed WaterNeedTable that every invoice reads from.

use crate::error::{PipelineError, PipelineResult};
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::thread;
use tracing::{debug, info, warn};

/// Daily variables requested from the archive, in the order the API expects them.
pub const DAILY_VARIABLES: [&str; 5] = [
    "temperature_2m_max",
    "temperature_2m_min",
    "windspeed_10m_max",
    "relative_humidity_2m_max",
    "shortwave_radiation_sum",
];

pub const DEFAULT_ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";

// ============================================================================
// CORE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// One day of climate observations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyClimate {
    pub date: NaiveDate,
    pub temp_max_c: f64,
    pub temp_min_c: f64,
    pub wind_speed_max_ms: f64,
    pub relative_humidity_max_pct: f64,
    pub shortwave_radiation_mj: f64,
}

impl DailyClimate {
    pub fn avg_temp_c(&self) -> f64 {
        (self.temp_max_c + self.temp_min_c) / 2.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailySeries {
    pub days: Vec<DailyClimate>,
}

impl DailySeries {
    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

/// Per-day water need for a reference area (1 m² in the pipeline)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyWaterNeed {
    pub date: NaiveDate,
    pub et0_mm: f64,
    pub etc_mm: f64,
    pub water_need_m3_per_unit_area: f64,
}

/// Which months irrigation happens in. Outside the season the need is zeroed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IrrigationSeason {
    AllYear,
    /// Inclusive month bounds, 1-12
    Months { first: u32, last: u32 },
}

impl IrrigationSeason {
    pub fn contains(&self, date: NaiveDate) -> bool {
        match *self {
            IrrigationSeason::AllYear => true,
            IrrigationSeason::Months { first, last } => {
                let m = date.month();
                if first <= last {
                    (first..=last).contains(&m)
                } else {
                    // wraps the new year, e.g. 11..=2
                    m >= first || m <= last
                }
            }
        }
    }
}

impl Default for IrrigationSeason {
    fn default() -> Self {
        IrrigationSeason::Months { first: 6, last: 10 }
    }
}

// ============================================================================
// CLIMATE SOURCE - seam between the estimator and the network
// ============================================================================

pub trait ClimateSource {
    /// Daily climate for every day of `[start, end]`.
    /// Fails with `UpstreamUnavailable` when no usable daily block comes back.
    fn fetch_climate(
        &self,
        coords: Coordinates,
        start: NaiveDate,
        end: NaiveDate,
    ) -> PipelineResult<DailySeries>;
}

/// Raw archive response. Arrays are parallel, indexed by `time`.
#[derive(Debug, Deserialize)]
struct ArchiveResponse {
    #[serde(default)]
    daily: Option<ArchiveDaily>,
}

#[derive(Debug, Deserialize)]
struct ArchiveDaily {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    windspeed_10m_max: Vec<Option<f64>>,
    #[serde(default)]
    relative_humidity_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    shortwave_radiation_sum: Vec<Option<f64>>,
}

/// Parse an archive JSON body into a DailySeries.
///
/// Days with a null in any variable are skipped (they count as missing
/// weather downstream, never as zero input to the formula).
pub fn parse_archive_response(body: &str, start: NaiveDate) -> PipelineResult<DailySeries> {
    let response: ArchiveResponse = serde_json::from_str(body)
        .map_err(|e| PipelineError::UpstreamUnavailable(format!("malformed response: {}", e)))?;

    let daily = response.daily.ok_or_else(|| {
        PipelineError::UpstreamUnavailable("response has no daily block".to_string())
    })?;

    // Every requested variable must cover every day; a partial block is no block
    let columns = [
        (DAILY_VARIABLES[0], daily.temperature_2m_max.len()),
        (DAILY_VARIABLES[1], daily.temperature_2m_min.len()),
        (DAILY_VARIABLES[2], daily.windspeed_10m_max.len()),
        (DAILY_VARIABLES[3], daily.relative_humidity_2m_max.len()),
        (DAILY_VARIABLES[4], daily.shortwave_radiation_sum.len()),
    ];
    let n = columns
        .iter()
        .map(|(_, len)| *len)
        .chain(std::iter::once(daily.time.len()))
        .max()
        .unwrap_or(0);
    if n == 0 {
        return Err(PipelineError::UpstreamUnavailable(
            "response has an empty daily block".to_string(),
        ));
    }
    for (name, len) in columns {
        if len != n {
            return Err(PipelineError::UpstreamUnavailable(format!(
                "daily variable '{}' has {} of {} values",
                name, len, n
            )));
        }
    }
    if !daily.time.is_empty() && daily.time.len() != n {
        return Err(PipelineError::UpstreamUnavailable(format!(
            "daily time axis has {} of {} entries",
            daily.time.len(),
            n
        )));
    }

    let mut days = Vec::with_capacity(n);
    let mut skipped = 0usize;

    for i in 0..n {
        let date = match daily.time.get(i) {
            Some(t) => NaiveDate::parse_from_str(t, "%Y-%m-%d").map_err(|e| {
                PipelineError::UpstreamUnavailable(format!("bad date '{}': {}", t, e))
            })?,
            None => start + Duration::days(i as i64),
        };

        let value = |series: &[Option<f64>]| series.get(i).copied().flatten();
        match (
            value(&daily.temperature_2m_max[..]),
            value(&daily.temperature_2m_min[..]),
            value(&daily.windspeed_10m_max[..]),
            value(&daily.relative_humidity_2m_max[..]),
            value(&daily.shortwave_radiation_sum[..]),
        ) {
            (Some(tmax), Some(tmin), Some(wind), Some(rh), Some(rad)) => days.push(DailyClimate {
                date,
                temp_max_c: tmax,
                temp_min_c: tmin,
                wind_speed_max_ms: wind,
                relative_humidity_max_pct: rh,
                shortwave_radiation_mj: rad,
            }),
            _ => {
                skipped += 1;
                debug!(%date, "incomplete climate record skipped");
            }
        }
    }

    if skipped > 0 {
        warn!(skipped, "climate days with null values were dropped");
    }

    Ok(DailySeries { days })
}

// ============================================================================
// OPEN-METEO ARCHIVE CLIENT (blocking)
// ============================================================================

#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    http: reqwest::blocking::Client,
    base_url: String,
    /// Extra attempts after the first one
    max_retries: u32,
    /// First backoff; doubles on each retry
    retry_backoff: std::time::Duration,
}

impl OpenMeteoClient {
    pub fn new(timeout: std::time::Duration) -> PipelineResult<Self> {
        Self::with_base_url(DEFAULT_ARCHIVE_URL.to_string(), timeout)
    }

    /// Custom endpoint (mirrors, local fixtures)
    pub fn with_base_url(base_url: String, timeout: std::time::Duration) -> PipelineResult<Self> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(format!("park-water/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::UpstreamUnavailable(format!("client setup: {}", e)))?;

        Ok(OpenMeteoClient {
            http,
            base_url,
            max_retries: 2,
            retry_backoff: std::time::Duration::from_millis(500),
        })
    }

    pub fn with_retries(mut self, max_retries: u32, backoff: std::time::Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

    /// Backoff before retry number `attempt + 1`; doubles each time, saturating
    fn backoff_for(&self, attempt: u32) -> std::time::Duration {
        self.retry_backoff.saturating_mul(2u32.saturating_pow(attempt))
    }

    fn request_once(
        &self,
        coords: Coordinates,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<String, (bool, String)> {
        let daily = DAILY_VARIABLES.join(",");
        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("latitude", coords.lat.to_string()),
                ("longitude", coords.lon.to_string()),
                ("start_date", start.format("%Y-%m-%d").to_string()),
                ("end_date", end.format("%Y-%m-%d").to_string()),
                ("daily", daily),
                ("timezone", "auto".to_string()),
            ])
            .send()
            // transport errors are worth retrying
            .map_err(|e| (true, format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err((status.is_server_error(), format!("HTTP {} - {}", status, body)));
        }

        response
            .text()
            .map_err(|e| (true, format!("reading body failed: {}", e)))
    }
}

impl ClimateSource for OpenMeteoClient {
    fn fetch_climate(
        &self,
        coords: Coordinates,
        start: NaiveDate,
        end: NaiveDate,
    ) -> PipelineResult<DailySeries> {
        info!(lat = coords.lat, lon = coords.lon, %start, %end, "fetching daily climate");

        let mut attempt = 0u32;
        loop {
            match self.request_once(coords, start, end) {
                Ok(body) => {
                    let series = parse_archive_response(&body, start)?;
                    info!(days = series.len(), "climate archive received");
                    return Ok(series);
                }
                Err((retryable, msg)) if retryable && attempt < self.max_retries => {
                    let wait = self.backoff_for(attempt);
                    warn!(attempt = attempt + 1, ?wait, error = %msg, "weather fetch failed, retrying");
                    thread::sleep(wait);
                    attempt += 1;
                }
                Err((_, msg)) => return Err(PipelineError::UpstreamUnavailable(msg)),
            }
        }
    }
}

// ============================================================================
// PENMAN–MONTEITH
// ============================================================================

/// Saturation vapor pressure (kPa) at `temp_c`
fn saturation_vapor_pressure(temp_c: f64) -> f64 {
    0.6108 * ((17.27 * temp_c) / (temp_c + 237.3)).exp()
}

/// Atmospheric pressure (kPa) from elevation, standard barometric formula
fn atmospheric_pressure(elevation_m: f64) -> f64 {
    101.3 * ((293.0 - 0.0065 * elevation_m) / 293.0).powf(5.26)
}

/// FAO-56 Penman–Monteith reference evapotranspiration (mm/day).
///
/// * `avg_temp_c` - mean daily temperature (°C)
/// * `wind_speed_ms` - wind speed (m/s)
/// * `relative_humidity_pct` - relative humidity (%)
/// * `radiation_mj` - shortwave radiation sum (MJ/m²/day)
/// * `elevation_m` - site elevation (m)
///
/// Never negative: implausible inputs floor at 0, and so does anything non-finite.
pub fn compute_et0(
    avg_temp_c: f64,
    wind_speed_ms: f64,
    relative_humidity_pct: f64,
    radiation_mj: f64,
    elevation_m: f64,
) -> f64 {
    let t = avg_temp_c;
    let e_s = saturation_vapor_pressure(t);
    let e_a = (relative_humidity_pct / 100.0) * e_s;
    let delta = 4098.0 * e_s / (t + 237.3).powi(2);
    let gamma = 0.000665 * atmospheric_pressure(elevation_m);

    let numerator = 0.408 * delta * radiation_mj
        + gamma * (900.0 / (t + 273.15)) * wind_speed_ms * (e_s - e_a);
    let denominator = delta + gamma * (1.0 + 0.34 * wind_speed_ms);

    let et0 = numerator / denominator;
    if et0.is_finite() {
        et0.max(0.0)
    } else {
        0.0
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Parameters that turn ET0 into a volume
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaterNeedParams {
    pub reference_area_m2: f64,
    pub crop_coefficient: f64,
    pub elevation_m: f64,
    pub season: IrrigationSeason,
}

impl Default for WaterNeedParams {
    fn default() -> Self {
        WaterNeedParams {
            reference_area_m2: 1.0,
            crop_coefficient: 0.8,
            elevation_m: 0.0,
            season: IrrigationSeason::default(),
        }
    }
}

/// Convert a climate series to per-day water need.
/// ETc = ET0 · kc; need (m³) = ETc (mm) · area (m²) / 1000, rounded to 4 places.
pub fn water_need_from_series(series: &DailySeries, params: &WaterNeedParams) -> Vec<DailyWaterNeed> {
    series
        .days
        .iter()
        .map(|day| {
            let et0 = compute_et0(
                day.avg_temp_c(),
                day.wind_speed_max_ms,
                day.relative_humidity_max_pct,
                day.shortwave_radiation_mj,
                params.elevation_m,
            );
            let etc = et0 * params.crop_coefficient;
            let need = if params.season.contains(day.date) {
                round4(etc * params.reference_area_m2 / 1000.0)
            } else {
                0.0
            };
            DailyWaterNeed {
                date: day.date,
                et0_mm: et0,
                etc_mm: etc,
                water_need_m3_per_unit_area: need,
            }
        })
        .collect()
}

/// Fetch climate for `[start, end]` and estimate the daily water need.
pub fn estimate_water_need(
    source: &dyn ClimateSource,
    coords: Coordinates,
    start: NaiveDate,
    end: NaiveDate,
    params: &WaterNeedParams,
) -> PipelineResult<Vec<DailyWaterNeed>> {
    let series = source.fetch_climate(coords, start, end)?;
    Ok(water_need_from_series(&series, params))
}

// ============================================================================
// WATER NEED TABLE - the lookup every invoice integrates over
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WaterNeedTable {
    by_date: BTreeMap<NaiveDate, f64>,
}

/// Result of integrating the table over a period
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodNeed {
    pub total_m3_per_unit_area: f64,
    pub missing_days: usize,
}

impl WaterNeedTable {
    pub fn from_daily(daily: &[DailyWaterNeed]) -> Self {
        WaterNeedTable {
            by_date: daily
                .iter()
                .map(|d| (d.date, d.water_need_m3_per_unit_area))
                .collect(),
        }
    }

    pub fn get(&self, date: NaiveDate) -> Option<f64> {
        self.by_date.get(&date).copied()
    }

    pub fn len(&self) -> usize {
        self.by_date.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_date.is_empty()
    }

    /// Sum over the closed interval `[start, end]`.
    /// Days without an entry contribute 0 and are counted in `missing_days`.
    pub fn sum_between(&self, start: NaiveDate, end: NaiveDate) -> PeriodNeed {
        if end < start {
            return PeriodNeed {
                total_m3_per_unit_area: 0.0,
                missing_days: 0,
            };
        }

        let total: f64 = self.by_date.range(start..=end).map(|(_, v)| *v).sum();
        let present = self.by_date.range(start..=end).count();
        let span = (end - start).num_days() as usize + 1;

        PeriodNeed {
            total_m3_per_unit_area: total,
            missing_days: span - present,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn climate(date: NaiveDate) -> DailyClimate {
        DailyClimate {
            date,
            temp_max_c: 30.0,
            temp_min_c: 20.0,
            wind_speed_max_ms: 2.0,
            relative_humidity_max_pct: 50.0,
            shortwave_radiation_mj: 20.0,
        }
    }

    #[test]
    fn test_et0_reference_value() {
        // Hand-computed FAO-56 value for T=25°C, u=2 m/s, RH=50%, Rs=20 MJ, z=900 m
        let et0 = compute_et0(25.0, 2.0, 50.0, 20.0, 900.0);
        assert!((et0 - 7.295_131_634).abs() < 1e-6, "got {}", et0);
    }

    #[test]
    fn test_et0_floors_at_zero() {
        // supersaturated air and no radiation pushes the formula negative
        assert_eq!(compute_et0(10.0, 5.0, 300.0, 0.0, 0.0), 0.0);
        // T = -237.3 divides by zero
        assert_eq!(compute_et0(-237.3, 1.0, 50.0, 10.0, 0.0), 0.0);
    }

    #[test]
    fn test_elevation_lowers_pressure() {
        assert!((atmospheric_pressure(0.0) - 101.3).abs() < 1e-9);
        assert!(atmospheric_pressure(900.0) < atmospheric_pressure(0.0));
    }

    proptest! {
        #[test]
        fn prop_et0_never_negative(
            t in -60.0f64..60.0,
            wind in 0.0f64..40.0,
            rh in 0.0f64..150.0,
            rad in -5.0f64..45.0,
            elev in -400.0f64..5000.0,
        ) {
            prop_assert!(compute_et0(t, wind, rh, rad, elev) >= 0.0);
        }
    }

    #[test]
    fn test_season_bounds() {
        let season = IrrigationSeason::default();
        assert!(!season.contains(d(2023, 5, 31)));
        assert!(season.contains(d(2023, 6, 1)));
        assert!(season.contains(d(2023, 10, 31)));
        assert!(!season.contains(d(2023, 11, 1)));
        assert!(IrrigationSeason::AllYear.contains(d(2023, 1, 15)));

        let winter = IrrigationSeason::Months { first: 11, last: 2 };
        assert!(winter.contains(d(2023, 12, 1)));
        assert!(winter.contains(d(2024, 2, 1)));
        assert!(!winter.contains(d(2024, 3, 1)));
    }

    #[test]
    fn test_water_need_zeroed_out_of_season() {
        let series = DailySeries {
            days: vec![climate(d(2023, 5, 31)), climate(d(2023, 6, 1))],
        };
        let need = water_need_from_series(&series, &WaterNeedParams::default());

        assert_eq!(need.len(), 2);
        assert!(need[0].et0_mm > 0.0);
        assert_eq!(need[0].water_need_m3_per_unit_area, 0.0);
        assert!(need[1].water_need_m3_per_unit_area > 0.0);
        assert!((need[1].etc_mm - need[1].et0_mm * 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_water_need_rounded_to_four_places() {
        let series = DailySeries { days: vec![climate(d(2023, 7, 1))] };
        let params = WaterNeedParams {
            reference_area_m2: 1.0,
            crop_coefficient: 1.0,
            elevation_m: 900.0,
            season: IrrigationSeason::AllYear,
        };
        let need = water_need_from_series(&series, &params);
        let v = need[0].water_need_m3_per_unit_area;
        assert_eq!(v, round4(v));
        assert!((v - need[0].etc_mm / 1000.0).abs() < 0.00005);
    }

    #[test]
    fn test_parse_archive_response() {
        let body = r#"{
            "latitude": 39.92,
            "daily": {
                "time": ["2023-06-01", "2023-06-02", "2023-06-03"],
                "temperature_2m_max": [30.0, 31.0, 29.0],
                "temperature_2m_min": [18.0, 19.0, null],
                "windspeed_10m_max": [10.0, 12.0, 9.0],
                "relative_humidity_2m_max": [60.0, 55.0, 70.0],
                "shortwave_radiation_sum": [25.0, 26.0, 24.0]
            }
        }"#;
        let series = parse_archive_response(body, d(2023, 6, 1)).unwrap();

        // the day with a null is dropped, not zero-filled
        assert_eq!(series.len(), 2);
        assert_eq!(series.days[1].date, d(2023, 6, 2));
        assert_eq!(series.days[0].avg_temp_c(), 24.0);
    }

    #[test]
    fn test_parse_missing_daily_block_is_upstream_error() {
        let err = parse_archive_response(r#"{"error": true, "reason": "quota"}"#, d(2023, 6, 1))
            .unwrap_err();
        assert!(err.is_upstream());

        let err = parse_archive_response("not json", d(2023, 6, 1)).unwrap_err();
        assert!(err.is_upstream());
    }

    #[test]
    fn test_parse_partial_daily_block_is_upstream_error() {
        // no shortwave_radiation_sum at all
        let body = r#"{
            "daily": {
                "time": ["2023-06-01", "2023-06-02"],
                "temperature_2m_max": [30.0, 31.0],
                "temperature_2m_min": [18.0, 19.0],
                "windspeed_10m_max": [10.0, 12.0],
                "relative_humidity_2m_max": [60.0, 55.0]
            }
        }"#;
        let err = parse_archive_response(body, d(2023, 6, 1)).unwrap_err();
        assert!(err.is_upstream());
        assert!(err.to_string().contains("shortwave_radiation_sum"), "{}", err);

        // one variable shorter than the rest
        let body = r#"{
            "daily": {
                "time": ["2023-06-01", "2023-06-02"],
                "temperature_2m_max": [30.0, 31.0],
                "temperature_2m_min": [18.0],
                "windspeed_10m_max": [10.0, 12.0],
                "relative_humidity_2m_max": [60.0, 55.0],
                "shortwave_radiation_sum": [25.0, 26.0]
            }
        }"#;
        let err = parse_archive_response(body, d(2023, 6, 1)).unwrap_err();
        assert!(err.to_string().contains("temperature_2m_min"), "{}", err);

        let err = parse_archive_response(r#"{"daily": {}}"#, d(2023, 6, 1)).unwrap_err();
        assert!(err.is_upstream());

        println!("✅ Partial daily block test PASSED");
    }

    #[test]
    fn test_retry_backoff_does_not_overflow() {
        let client = OpenMeteoClient::new(std::time::Duration::from_secs(1))
            .unwrap()
            .with_retries(40, std::time::Duration::from_millis(1));
        assert_eq!(client.backoff_for(39), std::time::Duration::from_millis(u32::MAX as u64));
        assert_eq!(client.backoff_for(2), std::time::Duration::from_millis(4));
    }

    #[test]
    fn test_single_day_sum_equals_value() {
        let table = WaterNeedTable::from_daily(&[DailyWaterNeed {
            date: d(2023, 6, 15),
            et0_mm: 5.0,
            etc_mm: 4.0,
            water_need_m3_per_unit_area: 0.004,
        }]);
        let p = table.sum_between(d(2023, 6, 15), d(2023, 6, 15));
        assert_eq!(p.total_m3_per_unit_area, 0.004);
        assert_eq!(p.missing_days, 0);
    }

    #[test]
    fn test_missing_days_counted() {
        let daily: Vec<DailyWaterNeed> = (1..=10)
            .filter(|day| *day != 5)
            .map(|day| DailyWaterNeed {
                date: d(2023, 6, day),
                et0_mm: 0.0,
                etc_mm: 0.0,
                water_need_m3_per_unit_area: 0.01,
            })
            .collect();
        let table = WaterNeedTable::from_daily(&daily);
        let p = table.sum_between(d(2023, 6, 1), d(2023, 6, 12));

        assert_eq!(p.missing_days, 3);
        assert!((p.total_m3_per_unit_area - 0.09).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_sum_is_additive(a in 0i64..60, b in 0i64..60, c in 0i64..60) {
            let mut cuts = [a, b, c];
            cuts.sort();
            let [x, y, z] = cuts;
            prop_assume!(y < z);

            let base = d(2023, 5, 1);
            let daily: Vec<DailyWaterNeed> = (0..90)
                .map(|i| DailyWaterNeed {
                    date: base + Duration::days(i),
                    et0_mm: 0.0,
                    etc_mm: 0.0,
                    water_need_m3_per_unit_area: (i % 7) as f64 * 0.0013,
                })
                .collect();
            let table = WaterNeedTable::from_daily(&daily);

            let d1 = base + Duration::days(x);
            let d2 = base + Duration::days(y);
            let d3 = base + Duration::days(z);
            let whole = table.sum_between(d1, d3).total_m3_per_unit_area;
            let left = table.sum_between(d1, d2).total_m3_per_unit_area;
            let right = table.sum_between(d2 + Duration::days(1), d3).total_m3_per_unit_area;
            prop_assert!((whole - (left + right)).abs() < 1e-9);
        }
    }
}
