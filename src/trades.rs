//! Cleaned per-(symbol, date) trade records: CSV loading and per-symbol grouping.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

const REQUIRED_COLUMNS: [&str; 7] = [
    "symbol",
    "trade_date",
    "mid_price",
    "spread",
    "volume_ton",
    "warehouse_name",
    "production_year",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub mid_price: f64,
    pub spread: f64,
    pub volume_ton: f64,
    pub warehouse_name: String,
    pub production_year: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeLoadConfig {
    /// Warehouse code to display name, applied when a record carries a bare code.
    pub warehouse_names: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum TradeLoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("trade file is missing column {column}")]
    MissingColumn { column: &'static str },
    #[error("failed to parse field {field} on line {line}: '{value}'")]
    ParseField {
        field: &'static str,
        line: u64,
        value: String,
    },
}

struct ColumnLayout {
    symbol: usize,
    trade_date: usize,
    mid_price: usize,
    spread: usize,
    volume_ton: usize,
    warehouse_name: usize,
    production_year: usize,
}

impl ColumnLayout {
    fn from_headers(headers: &StringRecord) -> Result<Self, TradeLoadError> {
        let positions: HashMap<&str, usize> = headers
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.trim(), idx))
            .collect();
        let find = |column: &'static str| {
            positions
                .get(column)
                .copied()
                .ok_or(TradeLoadError::MissingColumn { column })
        };

        Ok(Self {
            symbol: find(REQUIRED_COLUMNS[0])?,
            trade_date: find(REQUIRED_COLUMNS[1])?,
            mid_price: find(REQUIRED_COLUMNS[2])?,
            spread: find(REQUIRED_COLUMNS[3])?,
            volume_ton: find(REQUIRED_COLUMNS[4])?,
            warehouse_name: find(REQUIRED_COLUMNS[5])?,
            production_year: find(REQUIRED_COLUMNS[6])?,
        })
    }
}

pub fn load_trade_records(
    path: &Path,
    cfg: &TradeLoadConfig,
) -> Result<Vec<TradeRecord>, TradeLoadError> {
    let file = File::open(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(file);
    let layout = ColumnLayout::from_headers(reader.headers()?)?;

    let mut records = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        let row = row?;
        let line = row
            .position()
            .map(|pos| pos.line())
            .unwrap_or(idx as u64 + 2);
        records.push(parse_trade_record(&row, &layout, line, cfg)?);
    }

    info!(
        component = "trades",
        event = "trades.load.finish",
        path = %path.display(),
        records = records.len()
    );

    Ok(records)
}

/// Splits records into per-symbol series sorted by trade date.
///
/// At most one record per (symbol, date) survives; on a repeated date the later
/// row wins.
pub fn group_by_symbol(records: Vec<TradeRecord>) -> BTreeMap<String, Vec<TradeRecord>> {
    let mut grouped: BTreeMap<String, Vec<TradeRecord>> = BTreeMap::new();
    for record in records {
        grouped.entry(record.symbol.clone()).or_default().push(record);
    }

    for (symbol, series) in grouped.iter_mut() {
        // stable sort keeps file order among equal dates
        series.sort_by_key(|record| record.trade_date);

        let mut deduped: Vec<TradeRecord> = Vec::with_capacity(series.len());
        let mut duplicates_removed = 0u64;
        for record in series.drain(..) {
            match deduped.last_mut() {
                Some(existing) if existing.trade_date == record.trade_date => {
                    *existing = record;
                    duplicates_removed += 1;
                }
                _ => deduped.push(record),
            }
        }

        if duplicates_removed > 0 {
            warn!(
                component = "trades",
                event = "trades.group.duplicates_removed",
                symbol = %symbol,
                duplicates_removed
            );
        }
        *series = deduped;
    }

    grouped
}

fn parse_trade_record(
    row: &StringRecord,
    layout: &ColumnLayout,
    line: u64,
    cfg: &TradeLoadConfig,
) -> Result<TradeRecord, TradeLoadError> {
    let warehouse_raw = field(row, layout.warehouse_name);
    let warehouse_name = cfg
        .warehouse_names
        .get(warehouse_raw)
        .cloned()
        .unwrap_or_else(|| warehouse_raw.to_string());

    Ok(TradeRecord {
        symbol: field(row, layout.symbol).to_string(),
        trade_date: parse_date(row, layout.trade_date, line)?,
        mid_price: parse_f64(row, layout.mid_price, "mid_price", line)?,
        spread: parse_f64(row, layout.spread, "spread", line)?,
        volume_ton: parse_f64(row, layout.volume_ton, "volume_ton", line)?,
        warehouse_name,
        production_year: parse_optional_year(row, layout.production_year, line)?,
    })
}

fn field(row: &StringRecord, idx: usize) -> &str {
    row.get(idx).unwrap_or_default()
}

fn parse_date(row: &StringRecord, idx: usize, line: u64) -> Result<NaiveDate, TradeLoadError> {
    let raw = field(row, idx);
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|dt| dt.date()))
        .map_err(|_| TradeLoadError::ParseField {
            field: "trade_date",
            line,
            value: raw.to_string(),
        })
}

fn parse_f64(
    row: &StringRecord,
    idx: usize,
    field_name: &'static str,
    line: u64,
) -> Result<f64, TradeLoadError> {
    let raw = field(row, idx);
    raw.parse::<f64>().map_err(|_| TradeLoadError::ParseField {
        field: field_name,
        line,
        value: raw.to_string(),
    })
}

fn parse_optional_year(
    row: &StringRecord,
    idx: usize,
    line: u64,
) -> Result<Option<i32>, TradeLoadError> {
    let raw = field(row, idx);
    if raw.is_empty() {
        return Ok(None);
    }
    // production years sometimes arrive as floats ("2016.0") from upstream dumps
    let trimmed = raw.strip_suffix(".0").unwrap_or(raw);
    trimmed
        .parse::<i32>()
        .map(Some)
        .map_err(|_| TradeLoadError::ParseField {
            field: "production_year",
            line,
            value: raw.to_string(),
        })
}
