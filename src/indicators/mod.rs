// Technical indicators module
// EMA smoothing and crossover detection for the screener

pub mod crossover;
pub mod moving_average;

pub use crossover::{detect_crossovers, detect_crossovers_between, DEFAULT_WINDOW};
pub use moving_average::{
    compute_emas, compute_emas_from_closes, ema_series, EmaSeries, FAST_SPAN, MID_SPAN, SLOW_SPAN,
};
