use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use ecx_feature_store::{
    build_feature_schema, config_from_env, feature_router, init_logging, log_app_bind,
    log_app_start, log_schema_verified, log_store_opened, logging_config_from_env, FeatureLookup,
    SqliteFeatureStore, FEATURE_ROUTES, FEATURE_STORE_DIR, SQLITE_FILE,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("feature_server", &logging_cfg);

    let addr: SocketAddr = std::env::var("ECX_SERVER_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
        .parse()?;

    let cfg = config_from_env()?;
    let store_path = match std::env::var("ECX_FEATURE_DB") {
        Ok(path) => PathBuf::from(path),
        Err(_) => cfg.data_root.join(FEATURE_STORE_DIR).join(SQLITE_FILE),
    };
    if !store_path.is_file() {
        return Err(format!(
            "feature store {} does not exist; run feature_store_build first",
            store_path.display()
        )
        .into());
    }

    let expected = build_feature_schema(&cfg.features);
    let fingerprint = expected.fingerprint.clone();
    let store = SqliteFeatureStore::open(&store_path)?.with_expected_schema(expected);
    log_store_opened("feature_server", store.path(), Some(store.symbols()?.len()));
    let tables = store.verify_stored_schemas()?;
    log_schema_verified("feature_server", &fingerprint, tables);

    let app = feature_router(Arc::new(store));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind("feature_server", bound_addr, &FEATURE_ROUTES);
    axum::serve(listener, app).await?;

    Ok(())
}
