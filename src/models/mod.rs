pub mod universe;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

pub use universe::{Stock, NIFTY_50};

/// A closing price at a specific point in time
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub close: Decimal,
}

impl PricePoint {
    pub fn new(timestamp: DateTime<Utc>, close: Decimal) -> Self {
        Self { timestamp, close }
    }
}

/// Time-ordered closes for one symbol
///
/// Timestamps are strictly increasing, so there are never two samples for the
/// same instant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceSeries {
    symbol: String,
    points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            points: Vec::new(),
        }
    }

    /// Build a series from provider samples in any order
    ///
    /// Samples are sorted by time; when a timestamp repeats the later sample wins.
    pub fn from_points(symbol: impl Into<String>, mut points: Vec<PricePoint>) -> Self {
        points.sort_by_key(|p| p.timestamp);

        let mut deduped: Vec<PricePoint> = Vec::with_capacity(points.len());
        for point in points {
            match deduped.last_mut() {
                Some(last) if last.timestamp == point.timestamp => *last = point,
                _ => deduped.push(point),
            }
        }

        Self {
            symbol: symbol.into(),
            points: deduped,
        }
    }

    /// Append a sample; it must be later than the current last sample
    pub fn push(&mut self, point: PricePoint) -> Result<()> {
        if let Some(last) = self.points.last() {
            if point.timestamp <= last.timestamp {
                return Err(Error::OutOfOrder { at: point.timestamp });
            }
        }
        self.points.push(point);
        Ok(())
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Closes as floats for indicator math
    pub fn closes(&self) -> Vec<f64> {
        use rust_decimal::prelude::ToPrimitive;

        self.points
            .iter()
            .map(|p| p.close.to_f64().unwrap_or(f64::NAN))
            .collect()
    }
}

/// Direction of an EMA crossover
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CrossoverDirection {
    Bullish,
    Bearish,
}

/// A fast/slow EMA ordering flip between two adjacent samples
///
/// `index` is relative to the start of the trailing window that was scanned.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrossoverEvent {
    pub direction: CrossoverDirection,
    pub index: usize,
    pub fast_span: usize,
    pub slow_span: usize,
}

impl CrossoverEvent {
    pub fn describe(&self) -> String {
        match self.direction {
            CrossoverDirection::Bullish => format!(
                "Bullish crossover: EMA {} crossed above EMA {}",
                self.fast_span, self.slow_span
            ),
            CrossoverDirection::Bearish => format!(
                "Bearish crossover: EMA {} crossed below EMA {}",
                self.fast_span, self.slow_span
            ),
        }
    }
}

/// Lifecycle of a virtual position
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PositionStatus {
    Open,
    ClosedStop,
    ClosedTarget,
    ClosedError,
}

impl PositionStatus {
    pub fn is_closed(&self) -> bool {
        !matches!(self, PositionStatus::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "Open",
            PositionStatus::ClosedStop => "Stop-Loss Hit",
            PositionStatus::ClosedTarget => "Target Hit",
            PositionStatus::ClosedError => "Error",
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PositionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Open" => Ok(PositionStatus::Open),
            "Stop-Loss Hit" => Ok(PositionStatus::ClosedStop),
            "Target Hit" => Ok(PositionStatus::ClosedTarget),
            "Error" => Ok(PositionStatus::ClosedError),
            other => Err(format!("unknown position status: {}", other)),
        }
    }
}

/// Simulated position watched by the trade monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualPosition {
    pub id: Uuid,
    pub symbol: String,
    pub entry_price: Decimal,
    pub stop_loss_price: Decimal,
    pub target_price: Decimal,
    pub lot_size: u32,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
}

/// Settled trade, written once per closed position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub user_id: String,
    pub symbol: String,
    pub entry_price: Decimal,
    pub stop_loss_price: Decimal,
    pub target_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub profit_loss: Option<Decimal>,
    pub status: PositionStatus,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 9, 15, 0).unwrap() + Duration::minutes(minute)
    }

    #[test]
    fn test_push_rejects_duplicate_timestamp() {
        let mut series = PriceSeries::new("INFY.NS");
        series.push(PricePoint::new(at(0), Decimal::from(1500))).unwrap();

        let result = series.push(PricePoint::new(at(0), Decimal::from(1501)));
        assert!(matches!(result, Err(Error::OutOfOrder { .. })));

        let result = series.push(PricePoint::new(at(-1), Decimal::from(1499)));
        assert!(result.is_err());
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn test_from_points_sorts_and_dedups() {
        let series = PriceSeries::from_points(
            "INFY.NS",
            vec![
                PricePoint::new(at(2), Decimal::from(12)),
                PricePoint::new(at(0), Decimal::from(10)),
                PricePoint::new(at(2), Decimal::from(13)),
                PricePoint::new(at(1), Decimal::from(11)),
            ],
        );

        assert_eq!(series.len(), 3);
        assert_eq!(series.closes(), vec![10.0, 11.0, 13.0]);
        assert_eq!(series.last().unwrap().timestamp, at(2));
    }

    #[test]
    fn test_status_round_trips_through_log_text() {
        for status in [
            PositionStatus::Open,
            PositionStatus::ClosedStop,
            PositionStatus::ClosedTarget,
            PositionStatus::ClosedError,
        ] {
            assert_eq!(status.as_str().parse::<PositionStatus>().unwrap(), status);
        }
        assert!(!PositionStatus::Open.is_closed());
        assert!(PositionStatus::ClosedError.is_closed());
    }

    #[test]
    fn test_crossover_description() {
        let event = CrossoverEvent {
            direction: CrossoverDirection::Bearish,
            index: 3,
            fast_span: 20,
            slow_span: 50,
        };
        assert_eq!(
            event.describe(),
            "Bearish crossover: EMA 20 crossed below EMA 50"
        );
    }
}
