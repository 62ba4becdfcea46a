//! Leak-free rolling and exponentially weighted statistics over daily series.
//!
//! Every statistic attributed to day `d` is computed from observations on days
//! strictly before `d`. Fixed windows cover `[d - window, d - 1]`; exponentially
//! weighted state is read before day `d`'s own observation is folded in.

use serde::{Deserialize, Serialize};

use crate::series::DailySeries;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    /// `None` when the window holds no observation.
    pub mean: Option<f64>,
    /// Population standard deviation; `0` with fewer than two observations.
    pub std: f64,
    pub count: f64,
    pub sum: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EwStats {
    pub mean: Option<f64>,
    pub std: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
struct EwState {
    mean: f64,
    var: f64,
    seeded: bool,
}

impl EwState {
    fn update(&mut self, x: f64, alpha: f64) {
        if !self.seeded {
            self.mean = x;
            self.var = 0.0;
            self.seeded = true;
            return;
        }
        let delta = x - self.mean;
        let incr = alpha * delta;
        self.mean += incr;
        self.var = (1.0 - alpha) * (self.var + delta * incr);
    }

    fn snapshot(&self) -> EwStats {
        if !self.seeded {
            return EwStats::default();
        }
        EwStats {
            mean: Some(self.mean),
            std: Some(self.var.max(0.0).sqrt()),
        }
    }
}

pub fn rolling_window_stats(series: &DailySeries, window_days: usize) -> Vec<WindowStats> {
    let values = &series.values;
    (0..values.len())
        .map(|idx| {
            let start = idx.saturating_sub(window_days);
            window_stats(values[start..idx].iter().flatten().copied())
        })
        .collect()
}

/// Exponentially weighted mean/std, shifted one day.
///
/// Days without an observation leave the state untouched, so the value
/// attributed to the following day repeats the current one.
pub fn ewm_stats(series: &DailySeries, alpha: f64) -> Vec<EwStats> {
    let mut state = EwState::default();
    let mut out = Vec::with_capacity(series.len());
    for value in &series.values {
        out.push(state.snapshot());
        if let Some(x) = value {
            state.update(*x, alpha);
        }
    }
    out
}

fn window_stats(observations: impl Iterator<Item = f64> + Clone) -> WindowStats {
    let (count, sum) = observations
        .clone()
        .fold((0usize, 0.0f64), |(n, s), x| (n + 1, s + x));
    if count == 0 {
        return WindowStats {
            mean: None,
            std: 0.0,
            count: 0.0,
            sum: 0.0,
        };
    }

    let mean = sum / count as f64;
    let std = if count < 2 {
        0.0
    } else {
        let sq = observations
            .map(|x| {
                let d = x - mean;
                d * d
            })
            .sum::<f64>();
        (sq / count as f64).sqrt()
    };

    WindowStats {
        mean: Some(mean),
        std,
        count: count as f64,
        sum,
    }
}
