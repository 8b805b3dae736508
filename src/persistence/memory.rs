use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::TradeLogSink;
use crate::error::Result;
use crate::models::TradeRecord;

/// In-process trade log, used by tests and dry runs
#[derive(Default)]
pub struct MemorySink {
    logs: RwLock<HashMap<String, Vec<TradeRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total records across all users
    pub async fn len(&self) -> usize {
        self.logs.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TradeLogSink for MemorySink {
    async fn append(&self, record: &TradeRecord) -> Result<()> {
        self.logs
            .write()
            .await
            .entry(record.user_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn read_all(&self, user: &str) -> Result<Vec<TradeRecord>> {
        Ok(self.logs.read().await.get(user).cloned().unwrap_or_default())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
