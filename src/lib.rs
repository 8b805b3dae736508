// Core modules
pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod persistence;
pub mod screener;

// Re-export commonly used types
pub use error::{Error, Result};
pub use execution::{PriceFeed, TradeMonitor};
pub use models::*;
pub use persistence::TradeLogSink;
