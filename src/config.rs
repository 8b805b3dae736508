use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;
use crate::execution::{MonitorConfig, SettlementMode};

const ENV_PREFIX: &str = "TRADEWATCH";

/// Runtime settings
///
/// Layered as: built-in defaults, then an optional `tradewatch.toml` (or the
/// file named by `TRADEWATCH_CONFIG`), then `TRADEWATCH__SECTION__KEY`
/// environment variables.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub feed: FeedSettings,
    pub monitor: MonitorSettings,
    pub screener: ScreenerSettings,
    pub sink: SinkSettings,
    /// user id -> hex SHA-256 of the password
    pub users: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub requests_per_minute: u32,
    /// Range of daily closes fetched for screening
    pub history_range: String,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            base_url: "https://query1.finance.yahoo.com".to_string(),
            request_timeout_secs: 15,
            requests_per_minute: 60,
            history_range: "6mo".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub poll_interval_secs: u64,
    pub feed_timeout_secs: u64,
    pub settlement: SettlementMode,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            feed_timeout_secs: 10,
            settlement: SettlementMode::Boundary,
        }
    }
}

impl MonitorSettings {
    pub fn to_monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            feed_timeout: Duration::from_secs(self.feed_timeout_secs),
            settlement: self.settlement,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScreenerSettings {
    /// Trailing samples checked for crossovers
    pub window: usize,
    /// Also report EMA 50 / EMA 100 crossovers
    pub include_slow_pair: bool,
}

impl Default for ScreenerSettings {
    fn default() -> Self {
        Self {
            window: 5,
            include_slow_pair: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Memory,
    #[default]
    Csv,
    Sheet,
    Both,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    pub kind: SinkKind,
    pub csv_dir: PathBuf,
    pub sheet: Option<SheetSettings>,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            kind: SinkKind::Csv,
            csv_dir: PathBuf::from("trade_logs"),
            sheet: None,
        }
    }
}

/// Remote spreadsheet the trade rows are appended to
#[derive(Debug, Clone, Deserialize)]
pub struct SheetSettings {
    #[serde(default = "default_sheet_base_url")]
    pub base_url: String,
    pub spreadsheet_id: String,
    #[serde(default = "default_sheet_range")]
    pub range: String,
    pub access_token: String,
    #[serde(default = "default_sheet_timeout")]
    pub request_timeout_secs: u64,
}

fn default_sheet_base_url() -> String {
    "https://sheets.googleapis.com".to_string()
}

fn default_sheet_range() -> String {
    "Trades!A:I".to_string()
}

fn default_sheet_timeout() -> u64 {
    15
}

impl Settings {
    /// Load settings from the default file location and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(format!("{}_CONFIG", ENV_PREFIX))
            .unwrap_or_else(|_| "tradewatch".to_string());
        Self::load_from(&path)
    }

    /// Load settings with `path` as the optional config file
    pub fn load_from(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Settings>()?;

        tracing::debug!(
            feed = %settings.feed.base_url,
            sink = ?settings.sink.kind,
            users = settings.users.len(),
            "Loaded settings"
        );

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();

        assert_eq!(settings.monitor.poll_interval_secs, 5);
        assert_eq!(settings.monitor.settlement, SettlementMode::Boundary);
        assert_eq!(settings.screener.window, 5);
        assert_eq!(settings.sink.kind, SinkKind::Csv);
        assert!(settings.users.is_empty());

        let monitor = settings.monitor.to_monitor_config();
        assert_eq!(monitor.poll_interval, Duration::from_secs(5));
        assert_eq!(monitor.feed_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = std::env::temp_dir().join(format!("tradewatch-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.toml");
        std::fs::write(
            &path,
            r#"
[monitor]
poll_interval_secs = 2
settlement = "tick_price"

[sink]
kind = "both"
csv_dir = "/tmp/logs"

[sink.sheet]
spreadsheet_id = "sheet-123"
access_token = "token"

[users]
alice = "abc123"
"#,
        )
        .unwrap();

        let settings = Settings::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.monitor.poll_interval_secs, 2);
        assert_eq!(settings.monitor.feed_timeout_secs, 10);
        assert_eq!(settings.monitor.settlement, SettlementMode::TickPrice);
        assert_eq!(settings.sink.kind, SinkKind::Both);

        let sheet = settings.sink.sheet.unwrap();
        assert_eq!(sheet.spreadsheet_id, "sheet-123");
        assert_eq!(sheet.range, "Trades!A:I");
        assert_eq!(settings.users.get("alice").map(String::as_str), Some("abc123"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let settings = Settings::load_from("/nonexistent/tradewatch-settings").unwrap();
        assert_eq!(settings.feed.history_range, "6mo");
    }
}
