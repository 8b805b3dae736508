use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::config::FeedSettings;
use crate::error::{Error, Result};
use crate::execution::price_feed::{to_price, PriceFeed};
use crate::models::{PricePoint, PriceSeries};

// Type alias for the rate limiter to simplify signatures
type YahooRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Yahoo Finance chart API client
///
/// Cloneable; all clones share one rate limiter.
#[derive(Clone)]
pub struct YahooFinanceClient {
    client: Client,
    base_url: String,
    history_range: String,
    rate_limiter: Arc<YahooRateLimiter>,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    regular_market_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

impl YahooFinanceClient {
    pub fn new(settings: &FeedSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(settings.request_timeout_secs))
            .user_agent(concat!("tradewatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::feed("*", format!("failed to build HTTP client: {}", e)))?;

        let per_minute = NonZeroU32::new(settings.requests_per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)));

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            history_range: settings.history_range.clone(),
            rate_limiter,
        })
    }

    async fn fetch_chart(&self, symbol: &str, range: &str, interval: &str) -> Result<ChartResult> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        let response = self
            .client
            .get(&url)
            .query(&[("range", range), ("interval", interval)])
            .send()
            .await
            .map_err(|e| Error::feed(symbol, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::FeedDataMissing {
                symbol: symbol.to_string(),
            });
        }
        if !status.is_success() {
            return Err(Error::feed(symbol, format!("HTTP {}", status)));
        }

        let envelope: ChartEnvelope = response
            .json()
            .await
            .map_err(|e| Error::feed(symbol, format!("malformed chart response: {}", e)))?;

        if let Some(error) = envelope.chart.error {
            tracing::warn!(
                symbol = %symbol,
                code = %error.code,
                description = ?error.description,
                "Chart API reported an error"
            );
            return Err(Error::FeedDataMissing {
                symbol: symbol.to_string(),
            });
        }

        envelope
            .chart
            .result
            .and_then(|results| results.into_iter().next())
            .ok_or_else(|| Error::FeedDataMissing {
                symbol: symbol.to_string(),
            })
    }

    /// Pair timestamps with closes, skipping null closes
    fn points(symbol: &str, chart: &ChartResult) -> Result<Vec<PricePoint>> {
        let closes = chart.indicators.quote.first().map(|q| q.close.as_slice()).unwrap_or(&[]);

        chart
            .timestamp
            .iter()
            .zip(closes)
            .filter_map(|(&ts, close)| close.map(|c| (ts, c)))
            .map(|(ts, close)| {
                let at = DateTime::<Utc>::from_timestamp(ts, 0)
                    .ok_or_else(|| Error::feed(symbol, format!("bad timestamp {}", ts)))?;
                Ok(PricePoint::new(at, to_price(symbol, close)?))
            })
            .collect()
    }
}

#[async_trait]
impl PriceFeed for YahooFinanceClient {
    async fn latest_close(&self, symbol: &str) -> Result<PricePoint> {
        let chart = self.fetch_chart(symbol, "1d", "1m").await?;
        let points = Self::points(symbol, &chart)?;

        let point = match points.last() {
            Some(point) => *point,
            // Outside market hours the intraday series can be empty
            None => {
                let price = chart.meta.regular_market_price.ok_or_else(|| Error::FeedDataMissing {
                    symbol: symbol.to_string(),
                })?;
                let at = chart
                    .meta
                    .regular_market_time
                    .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
                    .unwrap_or_else(Utc::now);
                PricePoint::new(at, to_price(symbol, price)?)
            }
        };

        tracing::debug!(symbol = %symbol, price = %point.close, at = %point.timestamp, "Fetched quote");
        Ok(point)
    }

    async fn history(&self, symbol: &str) -> Result<PriceSeries> {
        let chart = self.fetch_chart(symbol, &self.history_range, "1d").await?;
        let points = Self::points(symbol, &chart)?;

        if points.is_empty() {
            return Err(Error::FeedDataMissing {
                symbol: symbol.to_string(),
            });
        }

        tracing::debug!(symbol = %symbol, samples = points.len(), "Fetched daily history");
        Ok(PriceSeries::from_points(symbol, points))
    }

    fn name(&self) -> &str {
        "yahoo"
    }
}
