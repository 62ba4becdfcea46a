//! Per-symbol daily feature tables: schema, assembly and the batch run.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Days, NaiveDate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::calendar::{build_calendar_grid, encode_calendar, CalendarGrid, CALENDAR_COLUMNS};
use crate::lag::{join_lags, LagRow, LAG_COLUMNS};
use crate::series::{DailySeries, TradeIndex};
use crate::trades::TradeRecord;
use crate::windowed::{ewm_stats, rolling_window_stats, EwStats, WindowStats};

pub const FEATURE_SCHEMA_VERSION: u32 = 1;
pub const LABEL_COLUMN: &str = "mid_price";

struct SeriesSpec {
    prefix: &'static str,
    with_sum: bool,
    with_ew: bool,
    value: fn(&TradeRecord) -> f64,
}

const SERIES: [SeriesSpec; 3] = [
    SeriesSpec {
        prefix: "price",
        with_sum: false,
        with_ew: true,
        value: mid_price,
    },
    SeriesSpec {
        prefix: "spread",
        with_sum: false,
        with_ew: false,
        value: spread,
    },
    SeriesSpec {
        prefix: "volume",
        with_sum: true,
        with_ew: true,
        value: volume_ton,
    },
];

fn mid_price(record: &TradeRecord) -> f64 {
    record.mid_price
}

fn spread(record: &TradeRecord) -> f64 {
    record.spread
}

fn volume_ton(record: &TradeRecord) -> f64 {
    record.volume_ton
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<FeatureColumn>,
}

impl FeatureSchema {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub window_days: u32,
    pub ew_alphas: Vec<f64>,
    /// Outer filter on raw trades: `[active_start, active_end_exclusive)`.
    pub active_start: NaiveDate,
    pub active_end_exclusive: NaiveDate,
    /// First day kept after feature computation. `None` drops the first
    /// `window_days` days of the grid instead.
    pub feature_start: Option<NaiveDate>,
    pub schema_version: u32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            ew_alphas: vec![0.1, 0.3],
            active_start: NaiveDate::from_ymd_opt(2012, 1, 6).expect("valid default active start"),
            active_end_exclusive: NaiveDate::from_ymd_opt(2018, 5, 11)
                .expect("valid default active end"),
            feature_start: NaiveDate::from_ymd_opt(2012, 3, 1),
            schema_version: FEATURE_SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("invalid feature config: {0}")]
    InvalidConfig(String),
    #[error("no trade records for symbol {symbol} in the active window")]
    EmptySeries { symbol: String },
    #[error("symbol {symbol} is absent from the input")]
    MissingSymbol { symbol: String },
    #[error("no feature row for symbol {symbol} on {date}")]
    NotFound { symbol: String, date: NaiveDate },
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub trade_date: NaiveDate,
    pub label: Option<f64>,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableKind {
    Complete,
    TargetLabeled,
}

impl TableKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::TargetLabeled => "with_target",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "complete" => Some(Self::Complete),
            "with_target" => Some(Self::TargetLabeled),
            _ => None,
        }
    }

    pub fn file_name(self, symbol: &str) -> String {
        format!("{symbol}_{}_features.csv", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub symbol: String,
    pub kind: TableKind,
    pub schema: FeatureSchema,
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    /// Exact-date lookup; never interpolates.
    pub fn row_for_date(&self, date: NaiveDate) -> Result<&FeatureRow, FeatureError> {
        self.rows
            .binary_search_by_key(&date, |row| row.trade_date)
            .map(|idx| &self.rows[idx])
            .map_err(|_| FeatureError::NotFound {
                symbol: self.symbol.clone(),
                date,
            })
    }

    pub fn value(&self, row: &FeatureRow, column: &str) -> Option<f64> {
        self.schema
            .column_index(column)
            .and_then(|idx| row.values.get(idx).copied().flatten())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolFeatureTables {
    pub complete: FeatureTable,
    pub target_labeled: FeatureTable,
}

#[derive(Debug)]
pub struct SymbolOutcome {
    pub symbol: String,
    pub result: Result<SymbolFeatureTables, FeatureError>,
}

#[derive(Debug, Default)]
pub struct FeatureStoreRun {
    pub outcomes: Vec<SymbolOutcome>,
}

impl FeatureStoreRun {
    pub fn succeeded(&self) -> impl Iterator<Item = &SymbolFeatureTables> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &FeatureError)> {
        self.outcomes.iter().filter_map(|outcome| {
            outcome
                .result
                .as_ref()
                .err()
                .map(|err| (outcome.symbol.as_str(), err))
        })
    }
}

pub fn build_feature_schema(cfg: &FeatureConfig) -> FeatureSchema {
    let window = cfg.window_days;
    let mut names: Vec<String> = LAG_COLUMNS.iter().map(|name| name.to_string()).collect();

    for spec in &SERIES {
        let prefix = spec.prefix;
        names.push(format!("{prefix}_ma_{window}"));
        names.push(format!("{prefix}_std_{window}"));
        names.push(format!("{prefix}_count_{window}"));
        if spec.with_sum {
            names.push(format!("{prefix}_sum_{window}"));
        }
    }

    for spec in SERIES.iter().filter(|spec| spec.with_ew) {
        let prefix = spec.prefix;
        for alpha in &cfg.ew_alphas {
            names.push(format!("{prefix}_ema_{alpha}"));
        }
        for alpha in &cfg.ew_alphas {
            names.push(format!("{prefix}_estd_{alpha}"));
        }
    }

    names.extend(CALENDAR_COLUMNS.iter().map(|name| name.to_string()));

    let columns: Vec<FeatureColumn> = names
        .into_iter()
        .map(|name| FeatureColumn { name })
        .collect();
    let fingerprint = schema_fingerprint(cfg, &columns);

    FeatureSchema {
        version: cfg.schema_version,
        fingerprint,
        columns,
    }
}

/// Rejects persisted tables whose version or fingerprint differ from `expected`.
pub fn assert_schema_compatible(
    expected: &FeatureSchema,
    stored_version: u32,
    stored_fingerprint: &str,
) -> Result<(), FeatureError> {
    if stored_version != expected.version {
        return Err(FeatureError::SchemaVersionMismatch {
            expected: expected.version,
            actual: stored_version,
        });
    }
    if stored_fingerprint != expected.fingerprint {
        return Err(FeatureError::SchemaFingerprintMismatch {
            expected: expected.fingerprint.clone(),
            actual: stored_fingerprint.to_string(),
        });
    }
    Ok(())
}

pub fn validate_config(cfg: &FeatureConfig) -> Result<(), FeatureError> {
    if cfg.window_days == 0 {
        return Err(FeatureError::InvalidConfig(
            "window_days must be > 0".to_string(),
        ));
    }

    if cfg.schema_version != FEATURE_SCHEMA_VERSION {
        return Err(FeatureError::InvalidConfig(format!(
            "schema_version must equal FEATURE_SCHEMA_VERSION ({FEATURE_SCHEMA_VERSION})"
        )));
    }

    if cfg.active_end_exclusive <= cfg.active_start {
        return Err(FeatureError::InvalidConfig(
            "active_end_exclusive must be after active_start".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for alpha in &cfg.ew_alphas {
        if !(*alpha > 0.0 && *alpha <= 1.0) {
            return Err(FeatureError::InvalidConfig(format!(
                "ew_alphas entries must be in (0, 1], got {alpha}"
            )));
        }
        if !seen.insert(alpha.to_bits()) {
            return Err(FeatureError::InvalidConfig(
                "ew_alphas entries must be unique".to_string(),
            ));
        }
    }

    Ok(())
}

/// Builds the complete and target-labeled tables for one symbol.
///
/// `records` must belong to `symbol`; they need not be pre-filtered to the
/// active window.
pub fn build_symbol_features(
    symbol: &str,
    records: &[TradeRecord],
    cfg: &FeatureConfig,
) -> Result<SymbolFeatureTables, FeatureError> {
    validate_config(cfg)?;
    let schema = build_feature_schema(cfg);

    let active: Vec<TradeRecord> = records
        .iter()
        .filter(|record| {
            record.trade_date >= cfg.active_start && record.trade_date < cfg.active_end_exclusive
        })
        .cloned()
        .collect();

    let grid = build_calendar_grid(symbol, &active)?;
    let index = TradeIndex::from_records(&active);
    let daily: Vec<DailySeries> = SERIES
        .iter()
        .map(|spec| DailySeries::from_records(&grid, &active, spec.value))
        .collect();
    let window_days = cfg.window_days as usize;

    let (lags, (window_stats, ew_stats)) = rayon::join(
        || join_lags(&grid, &index),
        || {
            rayon::join(
                || {
                    daily
                        .iter()
                        .map(|series| rolling_window_stats(series, window_days))
                        .collect::<Vec<_>>()
                },
                || {
                    SERIES
                        .iter()
                        .zip(&daily)
                        .filter(|(spec, _)| spec.with_ew)
                        .map(|(_, series)| {
                            cfg.ew_alphas
                                .iter()
                                .map(|alpha| ewm_stats(series, *alpha))
                                .collect::<Vec<_>>()
                        })
                        .collect::<Vec<_>>()
                },
            )
        },
    );

    let labels: HashMap<NaiveDate, f64> = active
        .iter()
        .map(|record| (record.trade_date, record.mid_price))
        .collect();
    let cutoff = warmup_cutoff(&grid, cfg);

    let rows: Vec<FeatureRow> = grid
        .days()
        .iter()
        .enumerate()
        .filter(|(_, day)| **day >= cutoff)
        .map(|(idx, day)| FeatureRow {
            trade_date: *day,
            label: labels.get(day).copied(),
            values: assemble_values(idx, *day, &lags, &window_stats, &ew_stats),
        })
        .collect();

    debug_assert!(rows
        .iter()
        .all(|row| row.values.len() == schema.columns.len()));

    let labeled: Vec<FeatureRow> = rows
        .iter()
        .filter(|row| row.label.is_some())
        .cloned()
        .collect();

    info!(
        component = "features",
        event = "features.symbol.assembled",
        symbol,
        grid_days = grid.len(),
        complete_rows = rows.len(),
        labeled_rows = labeled.len(),
        cutoff = %cutoff
    );

    Ok(SymbolFeatureTables {
        complete: FeatureTable {
            symbol: symbol.to_string(),
            kind: TableKind::Complete,
            schema: schema.clone(),
            rows,
        },
        target_labeled: FeatureTable {
            symbol: symbol.to_string(),
            kind: TableKind::TargetLabeled,
            schema,
            rows: labeled,
        },
    })
}

/// Runs every configured symbol independently; one symbol's failure never
/// aborts the others. Outcomes come back in `symbols` order.
pub fn build_feature_store(
    series_by_symbol: &BTreeMap<String, Vec<TradeRecord>>,
    symbols: &[String],
    cfg: &FeatureConfig,
) -> Result<FeatureStoreRun, FeatureError> {
    validate_config(cfg)?;
    let schema = build_feature_schema(cfg);

    info!(
        component = "features",
        event = "features.run.start",
        symbols = ?symbols,
        window_days = cfg.window_days,
        ew_alphas = ?cfg.ew_alphas,
        fingerprint = %schema.fingerprint
    );

    let outcomes: Vec<SymbolOutcome> = symbols
        .par_iter()
        .map(|symbol| {
            info!(
                component = "features",
                event = "features.symbol.start",
                symbol = %symbol
            );
            let result = match series_by_symbol.get(symbol) {
                Some(records) => build_symbol_features(symbol, records, cfg),
                None => Err(FeatureError::MissingSymbol {
                    symbol: symbol.clone(),
                }),
            };
            match &result {
                Ok(tables) => info!(
                    component = "features",
                    event = "features.symbol.finish",
                    symbol = %symbol,
                    complete_rows = tables.complete.rows.len(),
                    labeled_rows = tables.target_labeled.rows.len()
                ),
                Err(err) => warn!(
                    component = "features",
                    event = "features.symbol.failed",
                    symbol = %symbol,
                    error = %err
                ),
            }
            SymbolOutcome {
                symbol: symbol.clone(),
                result,
            }
        })
        .collect();

    let run = FeatureStoreRun { outcomes };
    info!(
        component = "features",
        event = "features.run.finish",
        succeeded = run.succeeded().count(),
        failed = run.failed().count()
    );

    Ok(run)
}

fn warmup_cutoff(grid: &CalendarGrid, cfg: &FeatureConfig) -> NaiveDate {
    if let Some(start) = cfg.feature_start {
        return start;
    }
    grid.first()
        .and_then(|first| first.checked_add_days(Days::new(u64::from(cfg.window_days))))
        .unwrap_or(NaiveDate::MAX)
}

fn assemble_values(
    idx: usize,
    day: NaiveDate,
    lags: &[LagRow],
    window_stats: &[Vec<WindowStats>],
    ew_stats: &[Vec<Vec<EwStats>>],
) -> Vec<Option<f64>> {
    let mut values = Vec::new();
    values.extend(lags[idx].to_array());

    for (spec, stats) in SERIES.iter().zip(window_stats) {
        let stat = stats[idx];
        values.push(stat.mean);
        values.push(Some(stat.std));
        values.push(Some(stat.count));
        if spec.with_sum {
            values.push(Some(stat.sum));
        }
    }

    for per_alpha in ew_stats {
        values.extend(per_alpha.iter().map(|stats| stats[idx].mean));
        values.extend(per_alpha.iter().map(|stats| stats[idx].std));
    }

    values.extend(encode_calendar(day).to_array().map(Some));
    values
}

fn schema_fingerprint(cfg: &FeatureConfig, columns: &[FeatureColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{};", cfg.schema_version));
    hasher.update(format!("window_days:{};", cfg.window_days));
    hasher.update("ew_alphas:");
    for alpha in &cfg.ew_alphas {
        hasher.update(format!("{alpha},"));
    }
    hasher.update(";columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(";");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_kind_names_match_file_convention() {
        assert_eq!(
            TableKind::Complete.file_name("ULK5"),
            "ULK5_complete_features.csv"
        );
        assert_eq!(
            TableKind::TargetLabeled.file_name("ULK5"),
            "ULK5_with_target_features.csv"
        );
        assert_eq!(TableKind::parse("with_target"), Some(TableKind::TargetLabeled));
        assert_eq!(TableKind::parse("labeled"), None);
    }

    #[test]
    fn default_config_is_valid() {
        validate_config(&FeatureConfig::default()).expect("defaults validate");
    }

    #[test]
    fn config_validation_rejects_bad_values() {
        let cases = [
            FeatureConfig {
                ew_alphas: vec![0.3, 0.3],
                ..FeatureConfig::default()
            },
            FeatureConfig {
                ew_alphas: vec![0.0],
                ..FeatureConfig::default()
            },
            FeatureConfig {
                active_end_exclusive: FeatureConfig::default().active_start,
                ..FeatureConfig::default()
            },
            FeatureConfig {
                schema_version: FEATURE_SCHEMA_VERSION + 1,
                ..FeatureConfig::default()
            },
        ];

        for cfg in cases {
            assert!(matches!(
                validate_config(&cfg),
                Err(FeatureError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn alpha_one_tracks_previous_observation() {
        let start = NaiveDate::from_ymd_opt(2013, 1, 1).expect("valid date");
        let records: Vec<TradeRecord> = [3.0, 5.0, 4.0]
            .into_iter()
            .enumerate()
            .map(|(i, price)| TradeRecord {
                symbol: "X".to_string(),
                trade_date: start + Days::new(i as u64),
                mid_price: price,
                spread: 0.0,
                volume_ton: 1.0,
                warehouse_name: String::new(),
                production_year: None,
            })
            .collect();
        let cfg = FeatureConfig {
            ew_alphas: vec![1.0],
            active_start: start,
            active_end_exclusive: start + Days::new(10),
            feature_start: Some(start),
            ..FeatureConfig::default()
        };

        let tables = build_symbol_features("X", &records, &cfg).expect("features build");
        let complete = &tables.complete;
        let emas: Vec<Option<f64>> = complete
            .rows
            .iter()
            .map(|row| complete.value(row, "price_ema_1"))
            .collect();
        assert_eq!(emas, vec![None, Some(3.0), Some(5.0)]);
    }
}
