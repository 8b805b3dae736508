use serde::{Deserialize, Serialize};

use crate::models::PriceSeries;

/// Spans tracked for every series
pub const FAST_SPAN: usize = 20;
pub const MID_SPAN: usize = 50;
pub const SLOW_SPAN: usize = 100;

/// Exponential moving average for every input point
///
/// Uses `alpha = 2 / (span + 1)` and seeds with the first value, without bias
/// adjustment, so output `i` only depends on inputs `0..=i`.
pub fn ema_series(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);

    let mut out = Vec::with_capacity(values.len());
    let mut iter = values.iter();

    let Some(&first) = iter.next() else {
        return out;
    };

    let mut ema = first;
    out.push(ema);
    for &value in iter {
        ema = alpha * value + (1.0 - alpha) * ema;
        out.push(ema);
    }

    out
}

/// EMA(20), EMA(50) and EMA(100) aligned index-for-index with a price series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmaSeries {
    pub ema_20: Vec<f64>,
    pub ema_50: Vec<f64>,
    pub ema_100: Vec<f64>,
}

impl EmaSeries {
    pub fn len(&self) -> usize {
        self.ema_20.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ema_20.is_empty()
    }
}

/// Recompute all tracked EMAs for a series from scratch
pub fn compute_emas(series: &PriceSeries) -> EmaSeries {
    compute_emas_from_closes(&series.closes())
}

pub fn compute_emas_from_closes(closes: &[f64]) -> EmaSeries {
    EmaSeries {
        ema_20: ema_series(closes, FAST_SPAN),
        ema_50: ema_series(closes, MID_SPAN),
        ema_100: ema_series(closes, SLOW_SPAN),
    }
}
