//! Logging setup from `ECX_LOG_*` and the lifecycle events shared by both binaries.

use std::env;
use std::net::SocketAddr;
use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn logging_config_from_env() -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Ok(level) = env::var("ECX_LOG_LEVEL") {
        let trimmed = level.trim();
        if !trimmed.is_empty() {
            config.level = trimmed.to_string();
        }
    }

    if let Ok(format) = env::var("ECX_LOG_FORMAT") {
        if let Some(parsed) = parse_log_format(&format) {
            config.format = parsed;
        }
    }

    if let Ok(include_target) = env::var("ECX_LOG_TARGET") {
        if let Some(parsed) = parse_bool(&include_target) {
            config.include_target = parsed;
        }
    }

    config
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_ansi(matches!(config.format, LogFormat::Pretty));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

pub fn log_app_start(component: &'static str, config: &LoggingConfig) {
    info!(
        component,
        event = "app.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

pub fn log_app_bind(component: &'static str, bound_addr: SocketAddr, routes: &[&str]) {
    info!(
        component,
        event = "app.bind",
        bind_addr = %bound_addr,
        routes = ?routes
    );
}

pub fn log_store_opened(component: &'static str, store_path: &Path, symbols: Option<usize>) {
    match symbols {
        Some(symbols) => info!(
            component,
            event = "store.opened",
            store_path = %store_path.display(),
            symbols
        ),
        None => info!(
            component,
            event = "store.opened",
            store_path = %store_path.display()
        ),
    }
}

/// Stored tables were checked against the schema derived from the running config.
pub fn log_schema_verified(component: &'static str, fingerprint: &str, tables: usize) {
    info!(
        component,
        event = "store.schema.verified",
        fingerprint,
        tables
    );
}

/// End of a batch build. `cleared` counts failed symbols whose stale tables were dropped.
pub fn log_run_summary(component: &'static str, succeeded: usize, failed: usize, cleared: usize) {
    if failed > 0 {
        warn!(
            component,
            event = "run.summary",
            succeeded,
            failed,
            cleared
        );
    } else {
        info!(
            component,
            event = "run.summary",
            succeeded,
            failed,
            cleared
        );
    }
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
