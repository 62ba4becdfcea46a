//! ECX feature store core crate.
//!
//! Turns cleaned, sparse per-symbol daily trade records into dense per-day
//! feature tables:
//! - calendar grid over each symbol's traded range
//! - as-of lags onto the last prior trades
//! - closed-left rolling and one-day-shifted exponentially weighted statistics
//! - cyclical calendar encodings
//! - complete and target-labeled table views, persisted to CSV and sqlite

mod calendar;
mod config;
mod features;
mod lag;
mod observability;
mod series;
mod server;
mod store;
mod trades;
mod windowed;

pub use calendar::{
    build_calendar_grid, encode_calendar, CalendarEncoding, CalendarGrid, CALENDAR_COLUMNS,
};
pub use config::{
    config_from_env, load_config_file, ConfigError, FeatureStoreConfig, FeatureStorePaths,
    FEATURE_STORE_DIR, SQLITE_FILE,
};
pub use features::{
    assert_schema_compatible, build_feature_schema, build_feature_store, build_symbol_features,
    validate_config, FeatureColumn, FeatureConfig, FeatureError, FeatureRow, FeatureSchema,
    FeatureStoreRun, FeatureTable, SymbolFeatureTables, SymbolOutcome, TableKind,
    FEATURE_SCHEMA_VERSION, LABEL_COLUMN,
};
pub use lag::{join_lags, LagRow, LAG_COLUMNS};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_run_summary, log_schema_verified,
    log_store_opened, logging_config_from_env, LogFormat, LoggingConfig, LoggingInitError,
};
pub use series::{DailySeries, TradeIndex};
pub use server::{feature_router, FEATURE_ROUTES};
pub use store::{
    remove_symbol_csvs, write_symbol_csvs, write_table_csv, FeatureLookup, FeatureLookupRow,
    InMemoryFeatureTables, NamedFeature, SqliteFeatureStore, StoreError,
};
pub use trades::{
    group_by_symbol, load_trade_records, TradeLoadConfig, TradeLoadError, TradeRecord,
};
pub use windowed::{ewm_stats, rolling_window_stats, EwStats, WindowStats};
