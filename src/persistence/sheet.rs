use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

use super::csv_file::parse_timestamp;
use super::TradeLogSink;
use crate::config::SheetSettings;
use crate::error::{Error, Result};
use crate::models::{PositionStatus, TradeRecord};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

/// Column order of a trade row in the shared sheet
const COLUMNS: [&str; 9] = [
    "Timestamp",
    "User",
    "Symbol",
    "Profit/Loss",
    "Entry Price",
    "Stop-Loss Price",
    "Target Price",
    "Exit Price",
    "Status",
];

/// Appends trade rows to a shared spreadsheet over the Sheets `values` REST API
///
/// All users share one sheet; the user id is a column.
pub struct SheetSink {
    client: Client,
    settings: SheetSettings,
    write_lock: Mutex<()>,
}

#[derive(Debug, Serialize)]
struct ValueRange {
    values: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

enum Attempt<T> {
    Done(T),
    Retry(String),
}

impl SheetSink {
    pub fn new(settings: SheetSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| Error::InvalidRequest(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            settings,
            write_lock: Mutex::new(()),
        })
    }

    fn values_url(&self) -> String {
        format!(
            "{}/v4/spreadsheets/{}/values/{}",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.spreadsheet_id,
            self.settings.range
        )
    }

    async fn append_once(&self, body: &ValueRange) -> std::result::Result<Attempt<()>, String> {
        let url = format!("{}:append", self.values_url());
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.settings.access_token)
            .query(&[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")])
            .json(body)
            .send()
            .await;

        match response {
            Ok(r) if r.status().is_success() => Ok(Attempt::Done(())),
            Ok(r) if is_transient(r.status()) => Ok(Attempt::Retry(format!("status {}", r.status()))),
            Ok(r) => {
                let status = r.status();
                let text = r.text().await.unwrap_or_else(|_| "Unknown error".to_string());
                Err(format!("sheet API error ({}): {}", status, text))
            }
            Err(e) => Ok(Attempt::Retry(e.to_string())),
        }
    }

    async fn fetch_once(&self) -> std::result::Result<Attempt<ValuesResponse>, String> {
        let response = self
            .client
            .get(self.values_url())
            .bearer_auth(&self.settings.access_token)
            .send()
            .await;

        match response {
            Ok(r) if r.status().is_success() => r
                .json::<ValuesResponse>()
                .await
                .map(Attempt::Done)
                .map_err(|e| format!("failed to parse sheet values: {}", e)),
            Ok(r) if is_transient(r.status()) => Ok(Attempt::Retry(format!("status {}", r.status()))),
            Ok(r) => Err(format!("sheet API error ({})", r.status())),
            Err(e) => Ok(Attempt::Retry(e.to_string())),
        }
    }
}

#[async_trait]
impl TradeLogSink for SheetSink {
    async fn append(&self, record: &TradeRecord) -> Result<()> {
        let user = &record.user_id;
        let body = ValueRange {
            values: vec![encode_row(record)],
        };

        let _guard = self.write_lock.lock().await;

        for attempt in 1..=MAX_RETRIES {
            match self.append_once(&body).await {
                Ok(Attempt::Done(())) => {
                    tracing::debug!(user = %user, symbol = %record.symbol, "Appended trade row to sheet");
                    return Ok(());
                }
                Ok(Attempt::Retry(reason)) if attempt < MAX_RETRIES => {
                    let backoff_ms = INITIAL_BACKOFF_MS * 2_u64.pow(attempt - 1);
                    tracing::warn!(
                        "Sheet append attempt {}/{} failed: {}. Retrying in {}ms...",
                        attempt,
                        MAX_RETRIES,
                        reason,
                        backoff_ms
                    );
                    sleep(Duration::from_millis(backoff_ms)).await;
                }
                Ok(Attempt::Retry(reason)) => {
                    return Err(Error::sink_write(
                        user,
                        format!("gave up after {} attempts: {}", MAX_RETRIES, reason),
                    ))
                }
                Err(reason) => return Err(Error::sink_write(user, reason)),
            }
        }

        Err(Error::sink_write(user, "all retry attempts failed"))
    }

    async fn read_all(&self, user: &str) -> Result<Vec<TradeRecord>> {
        for attempt in 1..=MAX_RETRIES {
            match self.fetch_once().await {
                Ok(Attempt::Done(response)) => {
                    return response
                        .values
                        .iter()
                        .filter(|row| row.first().map(String::as_str) != Some(COLUMNS[0]))
                        .filter(|row| row.get(1).map(String::as_str) == Some(user))
                        .map(|row| decode_row(row).map_err(|reason| Error::sink_read(user, reason)))
                        .collect();
                }
                Ok(Attempt::Retry(reason)) if attempt < MAX_RETRIES => {
                    let backoff_ms = INITIAL_BACKOFF_MS * 2_u64.pow(attempt - 1);
                    tracing::warn!(
                        "Sheet read attempt {}/{} failed: {}. Retrying in {}ms...",
                        attempt,
                        MAX_RETRIES,
                        reason,
                        backoff_ms
                    );
                    sleep(Duration::from_millis(backoff_ms)).await;
                }
                Ok(Attempt::Retry(reason)) => return Err(Error::sink_read(user, reason)),
                Err(reason) => return Err(Error::sink_read(user, reason)),
            }
        }

        Err(Error::sink_read(user, "all retry attempts failed"))
    }

    fn name(&self) -> &str {
        "sheet"
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn opt_decimal(value: Option<Decimal>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn encode_row(record: &TradeRecord) -> Vec<String> {
    vec![
        record.timestamp.to_rfc3339(),
        record.user_id.clone(),
        record.symbol.clone(),
        opt_decimal(record.profit_loss),
        record.entry_price.to_string(),
        record.stop_loss_price.to_string(),
        record.target_price.to_string(),
        opt_decimal(record.exit_price),
        record.status.to_string(),
    ]
}

fn decode_row(row: &[String]) -> std::result::Result<TradeRecord, String> {
    // Sheets drops trailing empty cells, so short rows are padded
    let cell = |i: usize| row.get(i).map(String::as_str).unwrap_or("");
    let decimal = |i: usize| -> std::result::Result<Option<Decimal>, String> {
        let text = cell(i);
        if text.is_empty() {
            Ok(None)
        } else {
            text.parse::<Decimal>()
                .map(Some)
                .map_err(|e| format!("bad {} {:?}: {}", COLUMNS[i], text, e))
        }
    };
    let required = |i: usize| -> std::result::Result<Decimal, String> {
        decimal(i)?.ok_or_else(|| format!("missing {}", COLUMNS[i]))
    };

    Ok(TradeRecord {
        timestamp: parse_timestamp(cell(0))?,
        user_id: cell(1).to_string(),
        symbol: cell(2).to_string(),
        profit_loss: decimal(3)?,
        entry_price: required(4)?,
        stop_loss_price: required(5)?,
        target_price: required(6)?,
        exit_price: decimal(7)?,
        status: cell(8).parse::<PositionStatus>()?,
    })
}
