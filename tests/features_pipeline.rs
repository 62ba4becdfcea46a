use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use ecx_feature_store::{
    assert_schema_compatible, build_feature_schema, build_feature_store, build_symbol_features,
    FeatureConfig, FeatureError, FeatureTable, TradeRecord, FEATURE_SCHEMA_VERSION,
};

fn d(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date expected")
}

fn trade(symbol: &str, date: NaiveDate, mid_price: f64, spread: f64, volume_ton: f64) -> TradeRecord {
    TradeRecord {
        symbol: symbol.to_string(),
        trade_date: date,
        mid_price,
        spread,
        volume_ton,
        warehouse_name: "Hawasa".to_string(),
        production_year: Some(2012),
    }
}

fn open_cfg() -> FeatureConfig {
    FeatureConfig {
        active_start: d(2000, 1, 1),
        active_end_exclusive: d(2100, 1, 1),
        feature_start: Some(d(2000, 1, 1)),
        ..FeatureConfig::default()
    }
}

/// 90 days from 2013-01-01; every third day (i % 3 == 1) has no trade.
fn gappy_series(symbol: &str) -> Vec<TradeRecord> {
    let start = d(2013, 1, 1);
    (0..90u64)
        .filter(|i| i % 3 != 1)
        .map(|i| {
            let x = i as f64;
            trade(
                symbol,
                start + Days::new(i),
                100.0 + (x * 0.7).sin() * 5.0,
                1.0 + (i % 4) as f64 * 0.25,
                10.0 + (i % 7) as f64,
            )
        })
        .collect()
}

fn value(table: &FeatureTable, date: NaiveDate, column: &str) -> Option<f64> {
    let row = table.row_for_date(date).expect("row should exist");
    table.value(row, column)
}

#[test]
fn schema_order_and_fingerprint_are_deterministic() {
    let cfg = FeatureConfig::default();
    let schema_a = build_feature_schema(&cfg);
    let schema_b = build_feature_schema(&cfg);

    assert_eq!(schema_a, schema_b);
    assert_eq!(schema_a.version, FEATURE_SCHEMA_VERSION);
    assert_eq!(schema_a.columns.len(), 28);

    let names: Vec<&str> = schema_a.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        &names[..4],
        &["lag_price", "lag_distance", "lag_price_twice", "second_lag_distance"]
    );
    assert_eq!(names[4], "price_ma_30");
    assert_eq!(names[7], "spread_ma_30");
    assert_eq!(names[13], "volume_sum_30");
    assert_eq!(
        &names[14..22],
        &[
            "price_ema_0.1",
            "price_ema_0.3",
            "price_estd_0.1",
            "price_estd_0.3",
            "volume_ema_0.1",
            "volume_ema_0.3",
            "volume_estd_0.1",
            "volume_estd_0.3",
        ]
    );
    assert_eq!(names[22], "weekday_sin");
    assert_eq!(names[27], "day_of_month_cos");

    let other = build_feature_schema(&FeatureConfig {
        ew_alphas: vec![0.1, 0.5],
        ..FeatureConfig::default()
    });
    assert_ne!(schema_a.fingerprint, other.fingerprint);

    assert_schema_compatible(&schema_a, schema_b.version, &schema_b.fingerprint)
        .expect("identical schema is compatible");
    let err = assert_schema_compatible(&schema_a, other.version, &other.fingerprint)
        .expect_err("different alphas must be incompatible");
    assert!(matches!(err, FeatureError::SchemaFingerprintMismatch { .. }));
    let err =
        assert_schema_compatible(&schema_a, FEATURE_SCHEMA_VERSION + 1, &schema_a.fingerprint)
            .expect_err("newer version must be incompatible");
    assert!(matches!(err, FeatureError::SchemaVersionMismatch { .. }));
}

#[test]
fn two_trade_example_matches_expected_lags() {
    let records = vec![
        trade("X", d(2012, 1, 1), 10.0, 1.0, 5.0),
        trade("X", d(2012, 1, 3), 12.0, 2.0, 7.0),
    ];
    let tables = build_symbol_features("X", &records, &open_cfg()).expect("features build");
    let complete = &tables.complete;

    assert_eq!(complete.rows.len(), 3);
    assert_eq!(value(complete, d(2012, 1, 2), "lag_price"), Some(10.0));
    assert_eq!(value(complete, d(2012, 1, 2), "lag_distance"), Some(1.0));
    assert_eq!(value(complete, d(2012, 1, 3), "lag_price"), Some(10.0));
    assert_eq!(value(complete, d(2012, 1, 3), "lag_distance"), Some(2.0));

    // head row is back-filled from 01-02
    assert_eq!(value(complete, d(2012, 1, 1), "lag_price"), Some(10.0));
    assert_eq!(value(complete, d(2012, 1, 1), "lag_distance"), Some(1.0));
    // no trade ever has two predecessors
    assert_eq!(value(complete, d(2012, 1, 3), "lag_price_twice"), None);

    assert_eq!(value(complete, d(2012, 1, 1), "price_ma_30"), None);
    assert_eq!(value(complete, d(2012, 1, 3), "price_ma_30"), Some(10.0));
    assert_eq!(value(complete, d(2012, 1, 3), "price_count_30"), Some(1.0));
    assert_eq!(value(complete, d(2012, 1, 3), "price_std_30"), Some(0.0));
    assert_eq!(value(complete, d(2012, 1, 3), "volume_sum_30"), Some(5.0));

    assert_eq!(value(complete, d(2012, 1, 1), "price_ema_0.1"), None);
    assert_eq!(value(complete, d(2012, 1, 2), "price_ema_0.1"), Some(10.0));
    assert_eq!(value(complete, d(2012, 1, 3), "price_ema_0.1"), Some(10.0));
    assert_eq!(value(complete, d(2012, 1, 2), "price_estd_0.3"), Some(0.0));

    let labels: Vec<Option<f64>> = complete.rows.iter().map(|row| row.label).collect();
    assert_eq!(labels, vec![Some(10.0), None, Some(12.0)]);
    assert_eq!(tables.target_labeled.rows.len(), 2);
}

#[test]
fn grid_covers_every_day_between_first_and_last_trade() {
    let records = gappy_series("X");
    let tables = build_symbol_features("X", &records, &open_cfg()).expect("features build");
    let rows = &tables.complete.rows;

    let first = records.first().expect("non-empty").trade_date;
    let last = records.last().expect("non-empty").trade_date;
    assert_eq!(rows.len() as i64, (last - first).num_days() + 1);
    assert!(rows
        .windows(2)
        .all(|pair| (pair[1].trade_date - pair[0].trade_date).num_days() == 1));
}

#[test]
fn features_never_see_the_current_or_later_days() {
    let records = gappy_series("X");
    let start = d(2013, 1, 1);
    let cfg = open_cfg();
    let baseline = build_symbol_features("X", &records, &cfg).expect("baseline builds");

    for cut in [20u64, 45, 70] {
        let cut_date = start + Days::new(cut);
        let mutated: Vec<TradeRecord> = records
            .iter()
            .cloned()
            .map(|mut record| {
                if record.trade_date >= cut_date {
                    record.mid_price *= 3.0;
                    record.spread += 5.0;
                    record.volume_ton *= 2.0;
                }
                record
            })
            .collect();
        let changed = build_symbol_features("X", &mutated, &cfg).expect("mutated builds");

        for (a, b) in baseline
            .complete
            .rows
            .iter()
            .zip(&changed.complete.rows)
            .filter(|(row, _)| row.trade_date <= cut_date)
        {
            assert_eq!(a.trade_date, b.trade_date);
            assert_eq!(a.values, b.values, "leak detected on {}", a.trade_date);
        }
    }
}

#[test]
fn sparse_windows_have_zero_std() {
    let records = vec![
        trade("X", d(2014, 1, 1), 50.0, 1.0, 3.0),
        trade("X", d(2014, 3, 1), 55.0, 1.5, 4.0),
    ];
    let tables = build_symbol_features("X", &records, &open_cfg()).expect("features build");
    let complete = &tables.complete;

    // one observation in the window
    assert_eq!(value(complete, d(2014, 1, 2), "price_std_30"), Some(0.0));
    assert_eq!(value(complete, d(2014, 1, 2), "spread_std_30"), Some(0.0));
    // empty window
    assert_eq!(value(complete, d(2014, 2, 15), "price_std_30"), Some(0.0));
    assert_eq!(value(complete, d(2014, 2, 15), "price_count_30"), Some(0.0));
    assert_eq!(value(complete, d(2014, 2, 15), "price_ma_30"), None);
    assert_eq!(value(complete, d(2014, 2, 15), "volume_sum_30"), Some(0.0));
}

#[test]
fn ew_state_carries_over_days_without_trades() {
    let records = gappy_series("X");
    let tables = build_symbol_features("X", &records, &open_cfg()).expect("features build");
    let complete = &tables.complete;
    let start = d(2013, 1, 1);

    for gap in [31u64, 52, 85] {
        let day = start + Days::new(gap);
        let next = start + Days::new(gap + 1);
        assert!(records.iter().all(|r| r.trade_date != day));
        for column in ["price_ema_0.1", "price_estd_0.3", "volume_ema_0.3", "volume_estd_0.1"] {
            let current = value(complete, day, column);
            assert!(current.is_some());
            assert_eq!(current, value(complete, next, column), "{column} on {next}");
        }
    }
}

#[test]
fn runs_are_bit_for_bit_identical() {
    let records = gappy_series("X");
    let cfg = FeatureConfig {
        feature_start: None,
        ..open_cfg()
    };
    let a = build_symbol_features("X", &records, &cfg).expect("first run");
    let b = build_symbol_features("X", &records, &cfg).expect("second run");

    assert_eq!(a, b);
}

#[test]
fn labeled_table_is_the_traded_subset_of_the_filtered_range() {
    let records = gappy_series("X");
    let cfg = FeatureConfig {
        active_start: d(2013, 1, 5),
        active_end_exclusive: d(2013, 3, 20),
        feature_start: Some(d(2013, 1, 20)),
        ..FeatureConfig::default()
    };
    let tables = build_symbol_features("X", &records, &cfg).expect("features build");
    let complete = &tables.complete;
    let labeled = &tables.target_labeled;

    let first = complete.rows.first().expect("rows").trade_date;
    let last = complete.rows.last().expect("rows").trade_date;
    assert_eq!(first, d(2013, 1, 20));
    assert!(last < d(2013, 3, 20));
    assert_eq!(complete.rows.len() as i64, (last - first).num_days() + 1);

    let expected_labeled = records
        .iter()
        .filter(|r| r.trade_date >= d(2013, 1, 20) && r.trade_date < d(2013, 3, 20))
        .count();
    assert_eq!(labeled.rows.len(), expected_labeled);
    assert!(labeled.rows.len() < complete.rows.len());
    for row in &labeled.rows {
        assert!(row.label.is_some());
        assert_eq!(complete.row_for_date(row.trade_date).expect("in complete"), row);
    }
}

#[test]
fn default_warm_up_drops_one_window_of_days() {
    let records = gappy_series("X");
    let cfg = FeatureConfig {
        feature_start: None,
        ..open_cfg()
    };
    let tables = build_symbol_features("X", &records, &cfg).expect("features build");

    assert_eq!(tables.complete.rows[0].trade_date, d(2013, 1, 31));
    assert_eq!(tables.complete.rows.len(), 60);
}

#[test]
fn lookup_of_absent_date_is_not_found() {
    let records = gappy_series("X");
    let tables = build_symbol_features("X", &records, &open_cfg()).expect("features build");

    let err = tables
        .complete
        .row_for_date(d(2015, 1, 1))
        .expect_err("date outside the table");
    assert!(matches!(err, FeatureError::NotFound { ref symbol, date } if symbol == "X" && date == d(2015, 1, 1)));

    // present in complete but not traded -> absent from the labeled view
    let untraded = d(2013, 1, 2);
    assert!(tables.complete.row_for_date(untraded).is_ok());
    assert!(tables.target_labeled.row_for_date(untraded).is_err());
}

#[test]
fn symbol_failures_are_isolated() {
    let mut grouped = BTreeMap::new();
    grouped.insert("GOOD".to_string(), gappy_series("GOOD"));
    grouped.insert(
        "STALE".to_string(),
        vec![trade("STALE", d(2001, 1, 1), 1.0, 0.1, 1.0)],
    );
    let cfg = FeatureConfig {
        active_start: d(2010, 1, 1),
        active_end_exclusive: d(2020, 1, 1),
        feature_start: Some(d(2010, 1, 1)),
        ..FeatureConfig::default()
    };
    let symbols: Vec<String> = ["STALE", "GOOD", "ABSENT"]
        .into_iter()
        .map(String::from)
        .collect();

    let run = build_feature_store(&grouped, &symbols, &cfg).expect("config is valid");

    let order: Vec<&str> = run.outcomes.iter().map(|o| o.symbol.as_str()).collect();
    assert_eq!(order, vec!["STALE", "GOOD", "ABSENT"]);
    assert!(matches!(
        run.outcomes[0].result,
        Err(FeatureError::EmptySeries { .. })
    ));
    assert!(run.outcomes[1].result.is_ok());
    assert!(matches!(
        run.outcomes[2].result,
        Err(FeatureError::MissingSymbol { .. })
    ));
    assert_eq!(run.succeeded().count(), 1);
    assert_eq!(run.failed().count(), 2);
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let grouped = BTreeMap::new();
    let cfg = FeatureConfig {
        ew_alphas: vec![0.1, 1.5],
        ..FeatureConfig::default()
    };

    let err = build_feature_store(&grouped, &["X".to_string()], &cfg).expect_err("must fail");
    assert!(matches!(err, FeatureError::InvalidConfig(_)));

    let err = build_symbol_features(
        "X",
        &gappy_series("X"),
        &FeatureConfig {
            window_days: 0,
            ..open_cfg()
        },
    )
    .expect_err("must fail");
    assert!(matches!(err, FeatureError::InvalidConfig(_)));
}
