//! Ordered per-symbol series types shared by the feature producers.

use chrono::NaiveDate;

use crate::calendar::CalendarGrid;
use crate::trades::TradeRecord;

/// One optional observation per contiguous calendar day, starting at `start`.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySeries {
    pub start: NaiveDate,
    pub values: Vec<Option<f64>>,
}

impl DailySeries {
    /// Lays `records` onto `grid`; days without a record hold `None`.
    pub fn from_records(
        grid: &CalendarGrid,
        records: &[TradeRecord],
        value: impl Fn(&TradeRecord) -> f64,
    ) -> Self {
        let mut values = vec![None; grid.len()];
        for record in records {
            if let Some(idx) = grid.index_of(record.trade_date) {
                values[idx] = Some(value(record));
            }
        }

        Self {
            start: grid.first().unwrap_or(NaiveDate::MIN),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Date-ordered `(trade_date, mid_price)` pairs answering "last entry strictly before X".
#[derive(Debug, Clone, PartialEq)]
pub struct TradeIndex {
    entries: Vec<(NaiveDate, f64)>,
}

impl TradeIndex {
    pub fn from_records(records: &[TradeRecord]) -> Self {
        let mut entries: Vec<(NaiveDate, f64)> = records
            .iter()
            .map(|record| (record.trade_date, record.mid_price))
            .collect();
        entries.sort_by_key(|(date, _)| *date);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_before(&self, date: NaiveDate) -> Option<(NaiveDate, f64)> {
        let idx = self.entries.partition_point(|(entry_date, _)| *entry_date < date);
        idx.checked_sub(1).map(|prev| self.entries[prev])
    }
}
