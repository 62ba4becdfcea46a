//! Persisted feature tables: CSV export, sqlite store and exact-date lookup.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::features::{
    assert_schema_compatible, FeatureError, FeatureRow, FeatureSchema, FeatureTable,
    SymbolFeatureTables, TableKind,
    LABEL_COLUMN,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("stored date '{0}' is not YYYY-MM-DD")]
    InvalidStoredDate(String),
    #[error("no stored feature tables for symbol {symbol}")]
    MissingSymbol { symbol: String },
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::MissingSymbol { .. } | Self::Feature(FeatureError::NotFound { .. })
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedFeature {
    pub name: String,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureLookupRow {
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub label: Option<f64>,
    pub features: Vec<NamedFeature>,
}

impl FeatureLookupRow {
    pub fn from_row(symbol: &str, schema: &FeatureSchema, row: &FeatureRow) -> Self {
        Self {
            symbol: symbol.to_string(),
            trade_date: row.trade_date,
            label: row.label,
            features: schema
                .columns
                .iter()
                .zip(&row.values)
                .map(|(column, value)| NamedFeature {
                    name: column.name.clone(),
                    value: *value,
                })
                .collect(),
        }
    }
}

/// Read side used by the serving layer: complete table, exact date only.
pub trait FeatureLookup: Send + Sync + 'static {
    fn lookup(&self, symbol: &str, date: NaiveDate) -> Result<FeatureLookupRow, StoreError>;
    fn symbols(&self) -> Result<Vec<String>, StoreError>;
}

#[derive(Clone, Default)]
pub struct InMemoryFeatureTables {
    inner: Arc<RwLock<HashMap<String, FeatureTable>>>,
}

impl InMemoryFeatureTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps only the complete table; that is the one lookups read.
    pub fn insert(&self, tables: &SymbolFeatureTables) -> Result<(), StoreError> {
        let mut guard = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        guard.insert(tables.complete.symbol.clone(), tables.complete.clone());
        Ok(())
    }
}

impl FeatureLookup for InMemoryFeatureTables {
    fn lookup(&self, symbol: &str, date: NaiveDate) -> Result<FeatureLookupRow, StoreError> {
        let guard = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        let table = guard.get(symbol).ok_or_else(|| StoreError::MissingSymbol {
            symbol: symbol.to_string(),
        })?;
        let row = table.row_for_date(date)?;
        Ok(FeatureLookupRow::from_row(symbol, &table.schema, row))
    }

    fn symbols(&self) -> Result<Vec<String>, StoreError> {
        let guard = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        let mut symbols: Vec<String> = guard.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }
}

pub struct SqliteFeatureStore {
    conn: Mutex<Connection>,
    path: PathBuf,
    /// Schema readers require; tables persisted under another config are rejected.
    expected_schema: Option<FeatureSchema>,
}

impl SqliteFeatureStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS feature_tables (
                symbol TEXT NOT NULL,
                table_kind TEXT NOT NULL,
                schema_version INTEGER NOT NULL,
                fingerprint TEXT NOT NULL,
                schema_json TEXT NOT NULL,
                row_count INTEGER NOT NULL,
                PRIMARY KEY(symbol, table_kind)
            ) WITHOUT ROWID;
            CREATE TABLE IF NOT EXISTS feature_rows (
                symbol TEXT NOT NULL,
                table_kind TEXT NOT NULL,
                trade_date TEXT NOT NULL,
                label REAL,
                values_json TEXT NOT NULL,
                PRIMARY KEY(symbol, table_kind, trade_date)
            ) WITHOUT ROWID;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
            expected_schema: None,
        })
    }

    pub fn with_expected_schema(mut self, schema: FeatureSchema) -> Self {
        self.expected_schema = Some(schema);
        self
    }

    /// Checks every stored table's version and fingerprint against the expected
    /// schema; returns the number of tables checked.
    pub fn verify_stored_schemas(&self) -> Result<usize, StoreError> {
        let Some(expected) = &self.expected_schema else {
            return Ok(0);
        };
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(
            "
            SELECT symbol, table_kind, schema_version, fingerprint
            FROM feature_tables
            ORDER BY symbol ASC, table_kind ASC
            ",
        )?;
        let stored = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        for (symbol, kind, version, fingerprint) in &stored {
            if let Err(err) = assert_schema_compatible(expected, *version, fingerprint) {
                warn!(
                    component = "store",
                    event = "store.schema.mismatch",
                    symbol = %symbol,
                    kind = %kind,
                    error = %err
                );
                return Err(err.into());
            }
        }
        Ok(stored.len())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces both of a symbol's tables in one transaction.
    pub fn replace_tables(&self, tables: &SymbolFeatureTables) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = conn.transaction()?;
        for table in [&tables.complete, &tables.target_labeled] {
            write_table(&tx, table)?;
        }
        tx.commit()?;

        info!(
            component = "store",
            event = "store.symbol.replaced",
            symbol = %tables.complete.symbol,
            complete_rows = tables.complete.rows.len(),
            labeled_rows = tables.target_labeled.rows.len()
        );
        Ok(())
    }

    /// Drops every stored table of `symbol`; returns the number of rows deleted.
    pub fn remove_symbol(&self, symbol: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = conn.transaction()?;
        let rows = tx.execute("DELETE FROM feature_rows WHERE symbol = ?1", params![symbol])?;
        let tables = tx.execute("DELETE FROM feature_tables WHERE symbol = ?1", params![symbol])?;
        tx.commit()?;

        if tables > 0 {
            info!(
                component = "store",
                event = "store.symbol.removed",
                symbol,
                rows
            );
        }
        Ok(rows)
    }

    pub fn load_table(&self, symbol: &str, kind: TableKind) -> Result<FeatureTable, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let schema = self.read_schema(&conn, symbol, kind)?;

        let mut stmt = conn.prepare(
            "
            SELECT trade_date, label, values_json
            FROM feature_rows
            WHERE symbol = ?1 AND table_kind = ?2
            ORDER BY trade_date ASC
            ",
        )?;
        let mut rows = stmt.query(params![symbol, kind.as_str()])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let raw_date: String = row.get(0)?;
            let label: Option<f64> = row.get(1)?;
            let values_json: String = row.get(2)?;
            out.push(FeatureRow {
                trade_date: parse_stored_date(&raw_date)?,
                label,
                values: serde_json::from_str(&values_json)?,
            });
        }

        Ok(FeatureTable {
            symbol: symbol.to_string(),
            kind,
            schema,
            rows: out,
        })
    }

    pub fn lookup_row(&self, symbol: &str, date: NaiveDate) -> Result<FeatureLookupRow, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let schema = self.read_schema(&conn, symbol, TableKind::Complete)?;

        let found: Option<(Option<f64>, String)> = conn
            .query_row(
                "
                SELECT label, values_json
                FROM feature_rows
                WHERE symbol = ?1 AND table_kind = ?2 AND trade_date = ?3
                ",
                params![
                    symbol,
                    TableKind::Complete.as_str(),
                    date.format(DATE_FORMAT).to_string()
                ],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (label, values_json) = found.ok_or_else(|| FeatureError::NotFound {
            symbol: symbol.to_string(),
            date,
        })?;
        let row = FeatureRow {
            trade_date: date,
            label,
            values: serde_json::from_str(&values_json)?,
        };

        debug!(
            component = "store",
            event = "store.lookup.hit",
            symbol,
            trade_date = %date
        );
        Ok(FeatureLookupRow::from_row(symbol, &schema, &row))
    }

    pub fn stored_symbols(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT symbol FROM feature_tables WHERE table_kind = ?1 ORDER BY symbol ASC",
        )?;
        let symbols = stmt
            .query_map(params![TableKind::Complete.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(symbols)
    }

    fn read_schema(
        &self,
        conn: &Connection,
        symbol: &str,
        kind: TableKind,
    ) -> Result<FeatureSchema, StoreError> {
        let schema_json: Option<String> = conn
            .query_row(
                "SELECT schema_json FROM feature_tables WHERE symbol = ?1 AND table_kind = ?2",
                params![symbol, kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let schema_json = schema_json.ok_or_else(|| StoreError::MissingSymbol {
            symbol: symbol.to_string(),
        })?;
        let stored: FeatureSchema = serde_json::from_str(&schema_json)?;
        if let Some(expected) = &self.expected_schema {
            assert_schema_compatible(expected, stored.version, &stored.fingerprint)?;
        }
        Ok(stored)
    }
}

impl FeatureLookup for SqliteFeatureStore {
    fn lookup(&self, symbol: &str, date: NaiveDate) -> Result<FeatureLookupRow, StoreError> {
        self.lookup_row(symbol, date)
    }

    fn symbols(&self) -> Result<Vec<String>, StoreError> {
        self.stored_symbols()
    }
}

/// Writes `trade_date, mid_price, <schema columns>`; nulls are empty cells.
pub fn write_table_csv(table: &FeatureTable, path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("csv.tmp");
    {
        let mut writer = csv::Writer::from_path(&tmp_path)?;
        let mut header = vec!["trade_date".to_string(), LABEL_COLUMN.to_string()];
        header.extend(table.schema.columns.iter().map(|column| column.name.clone()));
        writer.write_record(&header)?;

        for row in &table.rows {
            let mut record = Vec::with_capacity(header.len());
            record.push(row.trade_date.format(DATE_FORMAT).to_string());
            record.push(format_cell(row.label));
            record.extend(row.values.iter().map(|value| format_cell(*value)));
            writer.write_record(&record)?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp_path, path)?;

    info!(
        component = "store",
        event = "store.csv.written",
        symbol = %table.symbol,
        kind = table.kind.as_str(),
        rows = table.rows.len(),
        path = %path.display()
    );
    Ok(())
}

/// Writes both views into `dir` under their conventional file names.
pub fn write_symbol_csvs(
    tables: &SymbolFeatureTables,
    dir: &Path,
) -> Result<Vec<PathBuf>, StoreError> {
    let mut written = Vec::with_capacity(2);
    for table in [&tables.complete, &tables.target_labeled] {
        let path = dir.join(table.kind.file_name(&table.symbol));
        write_table_csv(table, &path)?;
        written.push(path);
    }
    Ok(written)
}

/// Removes the CSV views of `symbol` from `dir`; returns the paths that existed.
pub fn remove_symbol_csvs(symbol: &str, dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut removed = Vec::new();
    for kind in [TableKind::Complete, TableKind::TargetLabeled] {
        let path = dir.join(kind.file_name(symbol));
        match fs::remove_file(&path) {
            Ok(()) => removed.push(path),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(removed)
}

fn write_table(tx: &rusqlite::Transaction<'_>, table: &FeatureTable) -> Result<(), StoreError> {
    let kind = table.kind.as_str();
    tx.execute(
        "DELETE FROM feature_rows WHERE symbol = ?1 AND table_kind = ?2",
        params![table.symbol, kind],
    )?;
    tx.execute(
        "
        INSERT INTO feature_tables (
            symbol, table_kind, schema_version, fingerprint, schema_json, row_count
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(symbol, table_kind) DO UPDATE SET
            schema_version = excluded.schema_version,
            fingerprint = excluded.fingerprint,
            schema_json = excluded.schema_json,
            row_count = excluded.row_count
        ",
        params![
            table.symbol,
            kind,
            table.schema.version,
            table.schema.fingerprint,
            serde_json::to_string(&table.schema)?,
            table.rows.len() as i64,
        ],
    )?;

    let mut stmt = tx.prepare(
        "
        INSERT INTO feature_rows (symbol, table_kind, trade_date, label, values_json)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ",
    )?;
    for row in &table.rows {
        stmt.execute(params![
            table.symbol,
            kind,
            row.trade_date.format(DATE_FORMAT).to_string(),
            row.label,
            serde_json::to_string(&row.values)?,
        ])?;
    }
    Ok(())
}

fn parse_stored_date(raw: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|_| StoreError::InvalidStoredDate(raw.to_string()))
}

fn format_cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
