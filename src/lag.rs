//! As-of join of calendar days onto the most recent prior trades.

use serde::{Deserialize, Serialize};

use crate::calendar::CalendarGrid;
use crate::series::TradeIndex;

pub const LAG_COLUMNS: [&str; 4] = [
    "lag_price",
    "lag_distance",
    "lag_price_twice",
    "second_lag_distance",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LagRow {
    pub lag_price: Option<f64>,
    pub lag_distance: Option<f64>,
    pub lag_price_twice: Option<f64>,
    pub second_lag_distance: Option<f64>,
}

impl LagRow {
    pub fn to_array(self) -> [Option<f64>; 4] {
        [
            self.lag_price,
            self.lag_distance,
            self.lag_price_twice,
            self.second_lag_distance,
        ]
    }
}

/// Joins every grid day to the last trade strictly before it, and that trade
/// to the last trade strictly before its own date.
///
/// Values left missing by the lookup (only possible at the head of the series)
/// are back-filled column by column from the nearest later row. This is the one
/// place where a feature for day `d` can depend on a trade dated `>= d`.
pub fn join_lags(grid: &CalendarGrid, index: &TradeIndex) -> Vec<LagRow> {
    let mut rows: Vec<LagRow> = grid
        .days()
        .iter()
        .map(|&day| {
            let Some((first_date, first_price)) = index.last_before(day) else {
                return LagRow::default();
            };
            let second = index.last_before(first_date);
            LagRow {
                lag_price: Some(first_price),
                lag_distance: Some((day - first_date).num_days() as f64),
                lag_price_twice: second.map(|(_, price)| price),
                second_lag_distance: second
                    .map(|(second_date, _)| (day - second_date).num_days() as f64),
            }
        })
        .collect();

    back_fill(&mut rows, |row| &mut row.lag_price);
    back_fill(&mut rows, |row| &mut row.lag_distance);
    back_fill(&mut rows, |row| &mut row.lag_price_twice);
    back_fill(&mut rows, |row| &mut row.second_lag_distance);

    rows
}

fn back_fill(rows: &mut [LagRow], column: impl Fn(&mut LagRow) -> &mut Option<f64>) {
    let mut next: Option<f64> = None;
    for row in rows.iter_mut().rev() {
        let slot = column(row);
        match *slot {
            Some(value) => next = Some(value),
            None => *slot = next,
        }
    }
}
