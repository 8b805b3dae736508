use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use rust_decimal::Decimal;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use super::TradeLogSink;
use crate::error::{Error, Result};
use crate::models::{PositionStatus, TradeRecord};

pub const HEADER_FIELDS: [&str; 8] = [
    "Timestamp",
    "Symbol",
    "Entry Price",
    "Stop-Loss Price",
    "Target Price",
    "Exit Price",
    "Profit/Loss",
    "Status",
];

pub const HEADER: &str =
    "Timestamp,Symbol,Entry Price,Stop-Loss Price,Target Price,Exit Price,Profit/Loss,Status";

// Sub-second digits are only written when present
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// One CSV file per user: `<dir>/<user>_trades.csv`
pub struct CsvFileSink {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl CsvFileSink {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of a user's log file
    pub fn path_for(&self, user: &str) -> Result<PathBuf> {
        let name = file_stem(user)
            .ok_or_else(|| Error::InvalidRequest(format!("user id {:?} cannot name a log file", user)))?;
        Ok(self.dir.join(format!("{}_trades.csv", name)))
    }
}

#[async_trait]
impl TradeLogSink for CsvFileSink {
    async fn append(&self, record: &TradeRecord) -> Result<()> {
        let user = &record.user_id;
        let path = self.path_for(user)?;

        let _guard = self.write_lock.lock().await;

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::sink_write(user, e))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| Error::sink_write(user, e))?;

        let len = file
            .metadata()
            .await
            .map_err(|e| Error::sink_write(user, e))?
            .len();

        let mut bytes = Vec::new();
        if len > 0 && !ends_with_newline(&path, len).await.map_err(|e| Error::sink_write(user, e))? {
            tracing::warn!(user = %user, path = %path.display(), "Trade log ends mid-row, starting a new line");
            bytes.push(b'\n');
        }
        bytes.extend(encode(record, len == 0).map_err(|e| Error::sink_write(user, e))?);

        file.write_all(&bytes)
            .await
            .map_err(|e| Error::sink_write(user, e))?;
        file.flush().await.map_err(|e| Error::sink_write(user, e))?;

        tracing::debug!(user = %user, path = %path.display(), "Appended trade record");
        Ok(())
    }

    async fn read_all(&self, user: &str) -> Result<Vec<TradeRecord>> {
        let path = self.path_for(user)?;

        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::sink_read(user, e)),
        };

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(contents.as_bytes());

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row.map_err(|e| Error::sink_read(user, e))?;
            let line = row.position().map(|p| p.line()).unwrap_or_default();

            // A torn row from an interrupted write must not hide the rest of the log
            match decode_row(user, &row) {
                Ok(record) => records.push(record),
                Err(reason) => {
                    tracing::error!(user = %user, line, reason = %reason, "Skipping unreadable trade row")
                }
            }
        }

        Ok(records)
    }

    fn name(&self) -> &str {
        "csv"
    }
}

async fn ends_with_newline(path: &Path, len: u64) -> std::io::Result<bool> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(len - 1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}

/// Reduce a user id to a safe file-name stem
fn file_stem(user: &str) -> Option<String> {
    let stem: String = user
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if stem.is_empty() || stem.chars().all(|c| c == '.') {
        None
    } else {
        Some(stem)
    }
}

fn opt_decimal(value: Option<Decimal>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Serialize one record, preceded by the header row for a new file
fn encode(record: &TradeRecord, with_header: bool) -> std::result::Result<Vec<u8>, String> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    if with_header {
        writer.write_record(HEADER_FIELDS).map_err(|e| e.to_string())?;
    }
    writer
        .write_record([
            record.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            record.symbol.clone(),
            record.entry_price.to_string(),
            record.stop_loss_price.to_string(),
            record.target_price.to_string(),
            opt_decimal(record.exit_price),
            opt_decimal(record.profit_loss),
            record.status.to_string(),
        ])
        .map_err(|e| e.to_string())?;

    writer.into_inner().map_err(|e| e.to_string())
}

fn parse_decimal(field: &str) -> std::result::Result<Option<Decimal>, String> {
    if field.is_empty() {
        return Ok(None);
    }
    field
        .parse::<Decimal>()
        .map(Some)
        .map_err(|e| format!("bad number {:?}: {}", field, e))
}

fn required(field: &str, what: &str) -> std::result::Result<Decimal, String> {
    parse_decimal(field)?.ok_or_else(|| format!("missing {}", what))
}

pub(crate) fn parse_timestamp(field: &str) -> std::result::Result<DateTime<Utc>, String> {
    NaiveDateTime::parse_from_str(field, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(field, "%Y-%m-%d %H:%M:%S"))
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(field).map(|dt| dt.with_timezone(&Utc)))
        .map_err(|e| format!("bad timestamp {:?}: {}", field, e))
}

fn decode_row(user: &str, row: &StringRecord) -> std::result::Result<TradeRecord, String> {
    if row.len() != HEADER_FIELDS.len() {
        return Err(format!("expected {} fields, found {}", HEADER_FIELDS.len(), row.len()));
    }

    Ok(TradeRecord {
        user_id: user.to_string(),
        timestamp: parse_timestamp(&row[0])?,
        symbol: row[1].to_string(),
        entry_price: required(&row[2], "entry price")?,
        stop_loss_price: required(&row[3], "stop-loss price")?,
        target_price: required(&row[4], "target price")?,
        exit_price: parse_decimal(&row[5])?,
        profit_loss: parse_decimal(&row[6])?,
        status: row[7].parse::<PositionStatus>()?,
    })
}
