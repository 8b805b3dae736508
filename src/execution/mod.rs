// Virtual trade execution: quotes in, settled trades out
pub mod monitor;
pub mod position;
pub mod price_feed;

pub use monitor::{
    spawn_monitor, MonitorConfig, MonitorHandle, MonitorOutcome, MonitorRequest, MonitorState,
    Settlement, TickOutcome, TradeMonitor,
};
pub use position::{ExitReason, SettlementMode, TradeParams};
pub use price_feed::{PriceFeed, RandomWalkFeed, ScriptStep, ScriptedFeed};
