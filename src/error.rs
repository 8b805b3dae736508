use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the feed, the monitor and the trade log sinks
#[derive(Error, Debug)]
pub enum Error {
    #[error("price feed unavailable for {symbol}: {reason}")]
    FeedUnavailable { symbol: String, reason: String },

    #[error("price feed returned no data for {symbol}")]
    FeedDataMissing { symbol: String },

    #[error("price feed for {symbol} did not answer within {after:?}")]
    FeedTimeout { symbol: String, after: Duration },

    #[error("failed to persist trade for {user}: {reason}")]
    SinkWriteFailure { user: String, reason: String },

    #[error("failed to read trade log for {user}: {reason}")]
    SinkReadFailure { user: String, reason: String },

    #[error("invalid monitoring request: {0}")]
    InvalidRequest(String),

    #[error("position {0} is already closed")]
    PositionClosed(uuid::Uuid),

    #[error("price point at {at} is not after the last point of the series")]
    OutOfOrder { at: chrono::DateTime<chrono::Utc> },

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("authentication failed for {0}")]
    Authentication(String),

    #[error("monitor task failed: {0}")]
    Task(String),
}

impl Error {
    /// True for the errors that close a live position as `ClosedError`
    pub fn is_feed_failure(&self) -> bool {
        matches!(
            self,
            Error::FeedUnavailable { .. } | Error::FeedDataMissing { .. } | Error::FeedTimeout { .. }
        )
    }

    pub(crate) fn feed(symbol: &str, reason: impl std::fmt::Display) -> Self {
        Error::FeedUnavailable {
            symbol: symbol.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn sink_write(user: &str, reason: impl std::fmt::Display) -> Self {
        Error::SinkWriteFailure {
            user: user.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn sink_read(user: &str, reason: impl std::fmt::Display) -> Self {
        Error::SinkReadFailure {
            user: user.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
