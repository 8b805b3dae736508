use super::moving_average::{EmaSeries, FAST_SPAN, MID_SPAN};
use crate::models::{CrossoverDirection, CrossoverEvent};

/// Trailing samples scanned by the screener
pub const DEFAULT_WINDOW: usize = 5;

/// Detect EMA(20)/EMA(50) crossovers within the trailing `window` samples
pub fn detect_crossovers(ema: &EmaSeries, window: usize) -> Vec<CrossoverEvent> {
    detect_crossovers_between(&ema.ema_20, &ema.ema_50, window)
        .into_iter()
        .map(|(direction, index)| CrossoverEvent {
            direction,
            index,
            fast_span: FAST_SPAN,
            slow_span: MID_SPAN,
        })
        .collect()
}

/// Detect crossovers between two aligned lines
///
/// Both comparisons are non-strict. A pair that sits exactly on equality at
/// both ends therefore reports a bullish and a bearish event, bullish first.
/// Returned indices are relative to the start of the window.
pub fn detect_crossovers_between(
    fast: &[f64],
    slow: &[f64],
    window: usize,
) -> Vec<(CrossoverDirection, usize)> {
    let len = fast.len().min(slow.len());
    if len < 2 || window < 2 {
        return Vec::new();
    }

    let start = len - window.min(len);
    let fast = &fast[start..len];
    let slow = &slow[start..len];

    let mut events = Vec::new();
    for i in 1..fast.len() {
        if fast[i] >= slow[i] && fast[i - 1] <= slow[i - 1] {
            events.push((CrossoverDirection::Bullish, i));
        }
        if fast[i] <= slow[i] && fast[i - 1] >= slow[i - 1] {
            events.push((CrossoverDirection::Bearish, i));
        }
    }

    events
}
