// Crossover screening across a symbol universe
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::config::ScreenerSettings;
use crate::execution::PriceFeed;
use crate::indicators::{compute_emas, detect_crossovers, detect_crossovers_between, MID_SPAN, SLOW_SPAN};
use crate::models::{CrossoverEvent, PriceSeries, Stock};

/// A stock whose EMAs crossed inside the trailing window
#[derive(Debug, Clone)]
pub struct ScreenHit {
    pub stock: Stock,
    pub latest_price: Decimal,
    pub events: Vec<CrossoverEvent>,
}

#[derive(Debug, Default)]
pub struct ScreenReport {
    pub scanned: usize,
    pub hits: Vec<ScreenHit>,
    /// Symbols that could not be fetched, with the reason
    pub failures: Vec<(String, String)>,
}

/// Scans daily closes for recent EMA crossovers
pub struct Screener {
    feed: Arc<dyn PriceFeed>,
    window: usize,
    include_slow_pair: bool,
}

impl Screener {
    pub fn new(feed: Arc<dyn PriceFeed>, settings: &ScreenerSettings) -> Self {
        Self {
            feed,
            window: settings.window,
            include_slow_pair: settings.include_slow_pair,
        }
    }

    /// Crossovers for one already-fetched series; `None` when nothing crossed
    pub fn evaluate(&self, stock: &Stock, series: &PriceSeries) -> Option<ScreenHit> {
        let latest_price = series.last()?.close;
        let emas = compute_emas(series);

        let mut events = detect_crossovers(&emas, self.window);
        if self.include_slow_pair {
            events.extend(
                detect_crossovers_between(&emas.ema_50, &emas.ema_100, self.window)
                    .into_iter()
                    .map(|(direction, index)| CrossoverEvent {
                        direction,
                        index,
                        fast_span: MID_SPAN,
                        slow_span: SLOW_SPAN,
                    }),
            );
            events.sort_by_key(|e| e.index);
        }

        if events.is_empty() {
            return None;
        }

        Some(ScreenHit {
            stock: stock.clone(),
            latest_price,
            events,
        })
    }

    /// Fetch and evaluate every stock in turn
    ///
    /// A symbol that fails to load is recorded and skipped.
    pub async fn scan(&self, universe: &[Stock]) -> ScreenReport {
        let mut report = ScreenReport::default();

        for stock in universe {
            report.scanned += 1;

            let series = match self.feed.history(&stock.symbol).await {
                Ok(series) => series,
                Err(e) => {
                    tracing::warn!(symbol = %stock.symbol, error = %e, "Skipping symbol");
                    report.failures.push((stock.symbol.clone(), e.to_string()));
                    continue;
                }
            };

            if let Some(hit) = self.evaluate(stock, &series) {
                tracing::info!(
                    symbol = %stock.symbol,
                    price = %hit.latest_price,
                    events = hit.events.len(),
                    "Crossover found"
                );
                report.hits.push(hit);
            }
        }

        tracing::info!(
            scanned = report.scanned,
            hits = report.hits.len(),
            failures = report.failures.len(),
            feed = self.feed.name(),
            "Screen complete"
        );

        report
    }
}
