// Trade log persistence: one trait, pluggable backends
pub mod csv_file;
pub mod memory;
pub mod sheet;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{SinkKind, SinkSettings};
use crate::error::{Error, Result};
use crate::models::TradeRecord;

pub use csv_file::CsvFileSink;
pub use memory::MemorySink;
pub use sheet::SheetSink;

/// Append-only store of settled trades, partitioned by user id
///
/// Implementations create a user's log on first write and serialize
/// concurrent appends.
#[async_trait]
pub trait TradeLogSink: Send + Sync {
    async fn append(&self, record: &TradeRecord) -> Result<()>;

    /// All records for `user`, oldest first
    async fn read_all(&self, user: &str) -> Result<Vec<TradeRecord>>;

    fn name(&self) -> &str;
}

/// Writes every record to all sinks
///
/// There is no rollback: a record may land in some sinks and not others.
/// Reads come from the first sink.
pub struct FanOutSink {
    sinks: Vec<Arc<dyn TradeLogSink>>,
}

impl FanOutSink {
    pub fn new(sinks: Vec<Arc<dyn TradeLogSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl TradeLogSink for FanOutSink {
    async fn append(&self, record: &TradeRecord) -> Result<()> {
        let mut first_error = None;

        for sink in &self.sinks {
            if let Err(e) = sink.append(record).await {
                tracing::warn!(sink = sink.name(), user = %record.user_id, error = %e, "Sink append failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn read_all(&self, user: &str) -> Result<Vec<TradeRecord>> {
        match self.sinks.first() {
            Some(primary) => primary.read_all(user).await,
            None => Ok(Vec::new()),
        }
    }

    fn name(&self) -> &str {
        "fan-out"
    }
}

/// Build the sink selected by configuration
pub fn build_sink(settings: &SinkSettings) -> Result<Arc<dyn TradeLogSink>> {
    let sink: Arc<dyn TradeLogSink> = match settings.kind {
        SinkKind::Memory => Arc::new(MemorySink::new()),
        SinkKind::Csv => Arc::new(CsvFileSink::new(&settings.csv_dir)),
        SinkKind::Sheet => Arc::new(sheet_sink(settings)?),
        SinkKind::Both => {
            let csv: Arc<dyn TradeLogSink> = Arc::new(CsvFileSink::new(&settings.csv_dir));
            let sheet: Arc<dyn TradeLogSink> = Arc::new(sheet_sink(settings)?);
            Arc::new(FanOutSink::new(vec![csv, sheet]))
        }
    };

    tracing::info!(sink = sink.name(), "Trade log sink ready");
    Ok(sink)
}

fn sheet_sink(settings: &SinkSettings) -> Result<SheetSink> {
    let sheet = settings.sheet.as_ref().ok_or_else(|| {
        Error::InvalidRequest("sink.sheet settings are required for the sheet sink".into())
    })?;
    SheetSink::new(sheet.clone())
}
