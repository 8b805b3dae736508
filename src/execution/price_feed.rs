use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::models::{PricePoint, PriceSeries};

/// Source of quotes for the monitor and the screener
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Latest traded (closing) price for a symbol
    async fn latest_close(&self, symbol: &str) -> Result<PricePoint>;

    /// Daily closes used for EMA screening, oldest first
    async fn history(&self, symbol: &str) -> Result<PriceSeries>;

    fn name(&self) -> &str;
}

/// One scripted feed response
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Price(Decimal),
    Unavailable(String),
    Missing,
    /// Never answers; used to exercise feed timeouts
    Hang,
}

/// Replays a fixed sequence of quotes
///
/// Once the script runs out the feed either keeps returning the last price
/// (`holding_last`) or reports itself unavailable.
pub struct ScriptedFeed {
    steps: Mutex<VecDeque<ScriptStep>>,
    last_price: Mutex<Option<Decimal>>,
    hold_last: bool,
    calls: Mutex<usize>,
}

impl ScriptedFeed {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            last_price: Mutex::new(None),
            hold_last: false,
            calls: Mutex::new(0),
        }
    }

    /// Feed that returns `prices` in order
    pub fn from_prices<I>(prices: I) -> Self
    where
        I: IntoIterator<Item = Decimal>,
    {
        Self::new(prices.into_iter().map(ScriptStep::Price).collect())
    }

    /// Keep answering with the last price once the script is exhausted
    pub fn holding_last(mut self) -> Self {
        self.hold_last = true;
        self
    }

    /// Number of `latest_close` calls served so far
    pub fn calls(&self) -> usize {
        self.calls.lock().map(|c| *c).unwrap_or(0)
    }

    fn next_step(&self) -> Option<ScriptStep> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls += 1;
        }
        let mut steps = self.steps.lock().ok()?;
        match steps.pop_front() {
            Some(step) => Some(step),
            None if self.hold_last => self
                .last_price
                .lock()
                .ok()
                .and_then(|p| *p)
                .map(ScriptStep::Price),
            None => None,
        }
    }
}

#[async_trait]
impl PriceFeed for ScriptedFeed {
    async fn latest_close(&self, symbol: &str) -> Result<PricePoint> {
        // The lock guard must be gone before a hanging step awaits
        let step = self.next_step();

        match step {
            Some(ScriptStep::Price(price)) => {
                if let Ok(mut last) = self.last_price.lock() {
                    *last = Some(price);
                }
                Ok(PricePoint::new(Utc::now(), price))
            }
            Some(ScriptStep::Unavailable(reason)) => Err(Error::feed(symbol, reason)),
            Some(ScriptStep::Missing) => Err(Error::FeedDataMissing {
                symbol: symbol.to_string(),
            }),
            Some(ScriptStep::Hang) => std::future::pending().await,
            None => Err(Error::feed(symbol, "script exhausted")),
        }
    }

    async fn history(&self, symbol: &str) -> Result<PriceSeries> {
        let prices: Vec<Decimal> = self
            .steps
            .lock()
            .map(|steps| {
                steps
                    .iter()
                    .filter_map(|s| match s {
                        ScriptStep::Price(p) => Some(*p),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        if prices.is_empty() {
            return Err(Error::FeedDataMissing {
                symbol: symbol.to_string(),
            });
        }

        let start = Utc::now() - Duration::days(prices.len() as i64);
        let points = prices
            .into_iter()
            .enumerate()
            .map(|(i, p)| PricePoint::new(start + Duration::days(i as i64), p))
            .collect();

        Ok(PriceSeries::from_points(symbol, points))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Simulated quotes: a seeded random walk around a starting price
///
/// Useful for trying the monitor outside market hours.
pub struct RandomWalkFeed {
    rng: Mutex<StdRng>,
    price: Mutex<f64>,
    max_step_pct: f64,
}

impl RandomWalkFeed {
    /// # Arguments
    /// * `seed` - RNG seed for reproducible runs
    /// * `start_price` - First quote
    /// * `max_step_pct` - Largest move per quote, in percent
    pub fn new(seed: u64, start_price: f64, max_step_pct: f64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            price: Mutex::new(start_price),
            max_step_pct: max_step_pct.abs(),
        }
    }

    fn step(&self, symbol: &str) -> Result<Decimal> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|e| Error::feed(symbol, e.to_string()))?;
        let mut price = self
            .price
            .lock()
            .map_err(|e| Error::feed(symbol, e.to_string()))?;

        let bound = self.max_step_pct / 100.0;
        let change = if bound > 0.0 {
            rng.gen_range(-bound..bound)
        } else {
            0.0
        };
        *price = (*price * (1.0 + change)).max(0.01);

        to_price(symbol, *price)
    }
}

#[async_trait]
impl PriceFeed for RandomWalkFeed {
    async fn latest_close(&self, symbol: &str) -> Result<PricePoint> {
        let price = self.step(symbol)?;
        tracing::debug!(symbol = %symbol, price = %price, "Simulated quote");
        Ok(PricePoint::new(Utc::now(), price))
    }

    async fn history(&self, symbol: &str) -> Result<PriceSeries> {
        // Roughly six months of sessions
        const DAYS: i64 = 180;

        let start = Utc::now() - Duration::days(DAYS);
        let mut points = Vec::with_capacity(DAYS as usize);
        for day in 0..DAYS {
            points.push(PricePoint::new(start + Duration::days(day), self.step(symbol)?));
        }

        Ok(PriceSeries::from_points(symbol, points))
    }

    fn name(&self) -> &str {
        "random-walk"
    }
}

/// Convert a provider float into a price rounded to paise
pub(crate) fn to_price(symbol: &str, value: f64) -> Result<Decimal> {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(2))
        .ok_or_else(|| Error::feed(symbol, format!("unrepresentable price {}", value)))
}
