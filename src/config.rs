//! Run configuration: symbols, lookup tables and filesystem layout.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::features::FeatureConfig;
use crate::trades::TradeLoadConfig;

pub const FEATURE_STORE_DIR: &str = "feature_store";
pub const SQLITE_FILE: &str = "features.sqlite";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureStoreConfig {
    pub data_root: PathBuf,
    /// Cleaned trade CSV, relative to `data_root` unless absolute.
    pub input_file: PathBuf,
    pub symbols: Vec<String>,
    pub warehouse_names: BTreeMap<String, String>,
    pub features: FeatureConfig,
}

impl Default for FeatureStoreConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            input_file: PathBuf::from("silver/ecx_silver.csv"),
            symbols: ["LUBP4", "LUBP3", "ULK5", "UFRAUG"]
                .into_iter()
                .map(String::from)
                .collect(),
            warehouse_names: default_warehouse_names(),
            features: FeatureConfig::default(),
        }
    }
}

impl FeatureStoreConfig {
    pub fn trade_load_config(&self) -> TradeLoadConfig {
        TradeLoadConfig {
            warehouse_names: self.warehouse_names.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureStorePaths {
    pub input_file: PathBuf,
    pub feature_store_dir: PathBuf,
    pub sqlite_path: PathBuf,
}

impl FeatureStorePaths {
    /// Checks the input exists and creates the output directory.
    pub fn resolve(cfg: &FeatureStoreConfig) -> Result<Self, ConfigError> {
        let input_file = if cfg.input_file.is_absolute() {
            cfg.input_file.clone()
        } else {
            cfg.data_root.join(&cfg.input_file)
        };
        if !input_file.is_file() {
            return Err(ConfigError::MissingInput { path: input_file });
        }

        let feature_store_dir = cfg.data_root.join(FEATURE_STORE_DIR);
        fs::create_dir_all(&feature_store_dir).map_err(|source| ConfigError::CreateDir {
            path: feature_store_dir.clone(),
            source,
        })?;
        let sqlite_path = feature_store_dir.join(SQLITE_FILE);

        Ok(Self {
            input_file,
            feature_store_dir,
            sqlite_path,
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("input file {path} does not exist")]
    MissingInput { path: PathBuf },
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn load_config_file(path: &Path) -> Result<FeatureStoreConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg: FeatureStoreConfig =
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    if cfg.symbols.is_empty() {
        return Err(ConfigError::Invalid("symbols must not be empty".to_string()));
    }
    Ok(cfg)
}

/// `ECX_CONFIG_PATH` (JSON) if set, else defaults; `ECX_DATA_ROOT` overrides either.
pub fn config_from_env() -> Result<FeatureStoreConfig, ConfigError> {
    let mut cfg = match env::var("ECX_CONFIG_PATH") {
        Ok(path) if !path.trim().is_empty() => load_config_file(Path::new(path.trim()))?,
        _ => FeatureStoreConfig::default(),
    };

    if let Ok(root) = env::var("ECX_DATA_ROOT") {
        let trimmed = root.trim();
        if !trimmed.is_empty() {
            cfg.data_root = PathBuf::from(trimmed);
        }
    }

    Ok(cfg)
}

fn default_warehouse_names() -> BTreeMap<String, String> {
    [
        ("BG", "Bonga Gimbo"),
        ("HW", "Hawasa"),
        ("GM", "Gimbi"),
        ("SC", "SC Warehouse"),
        ("DD", "Dire Dawa"),
        ("DL", "Dilla Wenago"),
        ("JM", "Jimma Kersa"),
        ("BH", "Bule Hora"),
        ("BD", "Badele Zuria"),
        ("WS", "Weliso"),
        ("ME", "Metu Zuria"),
        ("H1", "H1 Warehouse"),
        ("D1", "D1 Warehouse"),
        ("B2", "B2 Warehouse"),
        ("S1", "S1 Warehouse"),
        ("W1", "W1 Warehouse"),
        ("J1", "J1 Warehouse"),
    ]
    .into_iter()
    .map(|(code, name)| (code.to_string(), name.to_string()))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{"symbols": ["ULK5"], "features": {{"window_days": 14, "ew_alphas": [0.5],
                "active_start": "2013-01-01", "active_end_exclusive": "2014-01-01",
                "feature_start": null, "schema_version": 1}}}}"#
        )
        .expect("write config");

        let cfg = load_config_file(file.path()).expect("config parses");
        assert_eq!(cfg.symbols, vec!["ULK5".to_string()]);
        assert_eq!(cfg.features.window_days, 14);
        assert_eq!(cfg.features.feature_start, None);
        assert_eq!(cfg.data_root, PathBuf::from("data"));
        assert_eq!(cfg.warehouse_names["HW"], "Hawasa");
    }

    #[test]
    fn empty_symbol_list_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"symbols": []}}"#).expect("write config");

        let err = load_config_file(file.path()).expect_err("must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn missing_input_is_reported_not_swallowed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cfg = FeatureStoreConfig {
            data_root: dir.path().to_path_buf(),
            ..FeatureStoreConfig::default()
        };

        let err = FeatureStorePaths::resolve(&cfg).expect_err("must fail");
        assert!(matches!(err, ConfigError::MissingInput { .. }));
    }

    #[test]
    fn resolve_creates_feature_store_dir() {
        let dir = tempfile::tempdir().expect("temp dir");
        let silver = dir.path().join("silver");
        fs::create_dir_all(&silver).expect("silver dir");
        fs::write(silver.join("ecx_silver.csv"), "symbol\n").expect("input file");
        let cfg = FeatureStoreConfig {
            data_root: dir.path().to_path_buf(),
            ..FeatureStoreConfig::default()
        };

        let paths = FeatureStorePaths::resolve(&cfg).expect("paths resolve");
        assert!(paths.feature_store_dir.is_dir());
        assert_eq!(paths.sqlite_path, dir.path().join("feature_store/features.sqlite"));
    }
}
