use std::path::Path;

use ecx_feature_store::{
    build_feature_store, config_from_env, group_by_symbol, init_logging, load_trade_records,
    log_app_start, log_run_summary, log_store_opened, logging_config_from_env,
    remove_symbol_csvs, write_symbol_csvs, FeatureStorePaths, SqliteFeatureStore, StoreError,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("feature_store_build", &logging_cfg);

    let cfg = config_from_env()?;
    let paths = FeatureStorePaths::resolve(&cfg)?;

    println!(
        "Feature store build | input={} out={} symbols={:?}",
        paths.input_file.display(),
        paths.feature_store_dir.display(),
        cfg.symbols
    );

    let records = load_trade_records(&paths.input_file, &cfg.trade_load_config())?;
    let series_by_symbol = group_by_symbol(records);
    let run = build_feature_store(&series_by_symbol, &cfg.symbols, &cfg.features)?;

    let store = SqliteFeatureStore::open(&paths.sqlite_path)?;
    log_store_opened("feature_store_build", store.path(), None);

    let mut failures = 0usize;
    let mut cleared = 0usize;
    for outcome in &run.outcomes {
        let persisted = match &outcome.result {
            Ok(tables) => write_symbol_csvs(tables, &paths.feature_store_dir)
                .and_then(|_| store.replace_tables(tables))
                .map(|()| tables)
                .map_err(|err| format!("PERSIST FAILED: {err}")),
            Err(err) => Err(format!("FAILED: {err}")),
        };

        match persisted {
            Ok(tables) => println!(
                "  {} | complete_rows={} labeled_rows={}",
                outcome.symbol,
                tables.complete.rows.len(),
                tables.target_labeled.rows.len()
            ),
            Err(message) => {
                failures += 1;
                println!("  {} | {message}", outcome.symbol);
                // a failed symbol must not keep serving tables from an earlier run
                match clear_symbol(&store, &paths.feature_store_dir, &outcome.symbol) {
                    Ok(true) => {
                        cleared += 1;
                        println!("  {} | cleared stale tables", outcome.symbol);
                    }
                    Ok(false) => {}
                    Err(clear_err) => {
                        println!("  {} | CLEAR FAILED: {clear_err}", outcome.symbol);
                    }
                }
            }
        }
    }

    log_run_summary(
        "feature_store_build",
        run.outcomes.len() - failures,
        failures,
        cleared,
    );
    if failures == run.outcomes.len() && failures > 0 {
        return Err(format!("all {failures} symbols failed").into());
    }

    println!(
        "Done | succeeded={} failed={} cleared={}",
        run.outcomes.len() - failures,
        failures,
        cleared
    );
    Ok(())
}

fn clear_symbol(store: &SqliteFeatureStore, dir: &Path, symbol: &str) -> Result<bool, StoreError> {
    let rows = store.remove_symbol(symbol)?;
    let files = remove_symbol_csvs(symbol, dir)?;
    Ok(rows > 0 || !files.is_empty())
}
