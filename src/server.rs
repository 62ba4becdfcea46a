//! HTTP routes over persisted feature tables.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::store::FeatureLookup;

/// Routes served by [`feature_router`], in registration order.
pub const FEATURE_ROUTES: [&str; 2] = ["/features", "/features/{symbol}/{date}"];

#[derive(Clone)]
struct FeatureAppState {
    source: Arc<dyn FeatureLookup>,
}

pub fn feature_router(source: Arc<dyn FeatureLookup>) -> Router {
    Router::new()
        .route(FEATURE_ROUTES[0], get(get_symbols))
        .route(FEATURE_ROUTES[1], get(get_feature_row))
        .with_state(FeatureAppState { source })
}

async fn get_symbols(State(state): State<FeatureAppState>) -> Response {
    match state.source.symbols() {
        Ok(symbols) => Json(symbols).into_response(),
        Err(err) => {
            warn!(
                component = "feature_server",
                event = "http.features.symbols",
                outcome = "error",
                error = %err
            );
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn get_feature_row(
    State(state): State<FeatureAppState>,
    Path((symbol, raw_date)): Path<(String, String)>,
) -> Response {
    let Ok(date) = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d") else {
        info!(
            component = "feature_server",
            event = "http.features.lookup",
            symbol = %symbol,
            date = %raw_date,
            outcome = "bad_date"
        );
        return (
            StatusCode::BAD_REQUEST,
            "can't parse date, please provide it as YYYY-MM-DD",
        )
            .into_response();
    };

    match state.source.lookup(&symbol, date) {
        Ok(row) => {
            info!(
                component = "feature_server",
                event = "http.features.lookup",
                symbol = %symbol,
                date = %date,
                outcome = "found"
            );
            Json(row).into_response()
        }
        Err(err) if err.is_not_found() => {
            info!(
                component = "feature_server",
                event = "http.features.lookup",
                symbol = %symbol,
                date = %date,
                outcome = "not_found"
            );
            (StatusCode::NOT_FOUND, err.to_string()).into_response()
        }
        Err(err) => {
            warn!(
                component = "feature_server",
                event = "http.features.lookup",
                symbol = %symbol,
                date = %date,
                outcome = "error",
                error = %err
            );
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}
