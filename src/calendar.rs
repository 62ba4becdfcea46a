//! Dense daily calendar grid and cyclical calendar encoding.

use std::f64::consts::PI;

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::features::FeatureError;
use crate::trades::TradeRecord;

// Divisors are part of the persisted feature contract; they are not the true
// cycle lengths (7, 12) and must not be changed without a schema version bump.
const WEEKDAY_DIVISOR: f64 = 6.0;
const MONTH_DIVISOR: f64 = 11.0;
const DAY_OF_MONTH_DIVISOR: f64 = 31.0;

pub const CALENDAR_COLUMNS: [&str; 6] = [
    "weekday_sin",
    "weekday_cos",
    "month_sin",
    "month_cos",
    "day_of_month_sin",
    "day_of_month_cos",
];

/// Contiguous, strictly increasing run of calendar days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarGrid {
    days: Vec<NaiveDate>,
}

impl CalendarGrid {
    pub fn days(&self) -> &[NaiveDate] {
        &self.days
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn first(&self) -> Option<NaiveDate> {
        self.days.first().copied()
    }

    pub fn last(&self) -> Option<NaiveDate> {
        self.days.last().copied()
    }

    /// Position of `date` in the grid, if it falls inside the spanned range.
    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        let first = self.first()?;
        let offset = (date - first).num_days();
        if offset < 0 || offset as usize >= self.days.len() {
            return None;
        }
        Some(offset as usize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalendarEncoding {
    pub weekday_sin: f64,
    pub weekday_cos: f64,
    pub month_sin: f64,
    pub month_cos: f64,
    pub day_of_month_sin: f64,
    pub day_of_month_cos: f64,
}

impl CalendarEncoding {
    pub fn to_array(self) -> [f64; 6] {
        [
            self.weekday_sin,
            self.weekday_cos,
            self.month_sin,
            self.month_cos,
            self.day_of_month_sin,
            self.day_of_month_cos,
        ]
    }
}

pub fn build_calendar_grid(
    symbol: &str,
    records: &[TradeRecord],
) -> Result<CalendarGrid, FeatureError> {
    let (Some(min), Some(max)) = (
        records.iter().map(|record| record.trade_date).min(),
        records.iter().map(|record| record.trade_date).max(),
    ) else {
        return Err(FeatureError::EmptySeries {
            symbol: symbol.to_string(),
        });
    };

    let span = (max - min).num_days() as usize;
    let mut days = Vec::with_capacity(span + 1);
    let mut day = min;
    while day <= max {
        days.push(day);
        match day.checked_add_days(Days::new(1)) {
            Some(next) => day = next,
            None => break,
        }
    }

    Ok(CalendarGrid { days })
}

pub fn encode_calendar(date: NaiveDate) -> CalendarEncoding {
    let weekday = date.weekday().num_days_from_monday() as f64;
    let month = date.month() as f64;
    let day_of_month = date.day() as f64;

    let weekday_angle = 2.0 * PI * weekday / WEEKDAY_DIVISOR;
    let month_angle = 2.0 * PI * month / MONTH_DIVISOR;
    let day_angle = 2.0 * PI * day_of_month / DAY_OF_MONTH_DIVISOR;

    CalendarEncoding {
        weekday_sin: weekday_angle.sin(),
        weekday_cos: weekday_angle.cos(),
        month_sin: month_angle.sin(),
        month_cos: month_angle.cos(),
        day_of_month_sin: day_angle.sin(),
        day_of_month_cos: day_angle.cos(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn trade(day: NaiveDate) -> TradeRecord {
        TradeRecord {
            symbol: "X".to_string(),
            trade_date: day,
            mid_price: 1.0,
            spread: 0.0,
            volume_ton: 0.0,
            warehouse_name: String::new(),
            production_year: None,
        }
    }

    #[test]
    fn grid_spans_min_to_max_without_gaps() {
        let records = vec![
            trade(date(2012, 2, 27)),
            trade(date(2012, 3, 2)),
            trade(date(2012, 3, 5)),
        ];
        let grid = build_calendar_grid("X", &records).expect("grid builds");

        // 2012 is a leap year
        assert_eq!(grid.len(), 8);
        assert_eq!(grid.first(), Some(date(2012, 2, 27)));
        assert_eq!(grid.last(), Some(date(2012, 3, 5)));
        assert!(grid
            .days()
            .windows(2)
            .all(|pair| (pair[1] - pair[0]).num_days() == 1));
        assert_eq!(grid.index_of(date(2012, 2, 29)), Some(2));
        assert_eq!(grid.index_of(date(2012, 3, 6)), None);
        assert_eq!(grid.index_of(date(2012, 2, 26)), None);
    }

    #[test]
    fn single_record_yields_one_day() {
        let grid = build_calendar_grid("X", &[trade(date(2014, 6, 1))]).expect("grid builds");
        assert_eq!(grid.days(), &[date(2014, 6, 1)]);
    }

    #[test]
    fn empty_input_is_empty_series() {
        let err = build_calendar_grid("ULK5", &[]).expect_err("must fail");
        assert!(matches!(err, FeatureError::EmptySeries { symbol } if symbol == "ULK5"));
    }

    #[test]
    fn encoding_uses_fixed_divisors() {
        // 2012-01-04 is a Wednesday: weekday index 2
        let enc = encode_calendar(date(2012, 1, 4));
        assert!((enc.weekday_sin - (2.0 * PI * 2.0 / 6.0).sin()).abs() < 1e-12);
        assert!((enc.month_cos - (2.0 * PI * 1.0 / 11.0).cos()).abs() < 1e-12);
        assert!((enc.day_of_month_sin - (2.0 * PI * 4.0 / 31.0).sin()).abs() < 1e-12);
    }

    #[test]
    fn every_pair_lies_on_the_unit_circle() {
        let mut day = date(2015, 1, 1);
        for _ in 0..400 {
            let v = encode_calendar(day).to_array();
            for pair in v.chunks(2) {
                assert!((pair[0] * pair[0] + pair[1] * pair[1] - 1.0).abs() < 1e-12);
            }
            day = day.succ_opt().expect("next day");
        }
    }
}
