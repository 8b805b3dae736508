use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};

use super::position::{SettlementMode, TradeParams};
use super::price_feed::PriceFeed;
use crate::error::{Error, Result};
use crate::models::{PricePoint, TradeRecord, VirtualPosition};
use crate::persistence::TradeLogSink;

/// Timing and settlement knobs for a monitoring session
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Wait between ticks
    pub poll_interval: Duration,
    /// Upper bound on a single feed call; expiry counts as a feed failure
    pub feed_timeout: Duration,
    pub settlement: SettlementMode,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            feed_timeout: Duration::from_secs(10),
            settlement: SettlementMode::Boundary,
        }
    }
}

/// Who wants to watch what
#[derive(Debug, Clone)]
pub struct MonitorRequest {
    pub user_id: String,
    pub symbol: String,
    pub params: TradeParams,
}

impl MonitorRequest {
    pub fn new(user_id: impl Into<String>, symbol: impl Into<String>, params: TradeParams) -> Self {
        Self {
            user_id: user_id.into(),
            symbol: symbol.into(),
            params,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(Error::InvalidRequest("user id is empty".into()));
        }
        if self.symbol.trim().is_empty() {
            return Err(Error::InvalidRequest("symbol is empty".into()));
        }
        self.params.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Waiting for the entry quote
    Pending,
    Open,
    Closed,
}

/// Terminal result of a position
///
/// The record is always present; `persisted` says whether the sink accepted it.
/// `cause` holds the feed error behind a `ClosedError` settlement.
#[derive(Debug)]
pub struct Settlement {
    pub record: TradeRecord,
    pub persisted: Result<()>,
    pub cause: Option<Error>,
}

impl Settlement {
    pub fn is_persisted(&self) -> bool {
        self.persisted.is_ok()
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    Holding {
        price: Decimal,
        unrealized_pnl: Decimal,
    },
    Settled(Settlement),
}

#[derive(Debug)]
pub enum MonitorOutcome {
    Settled(Settlement),
    /// Stopped before an exit fired; the position is still open and unlogged
    Cancelled(VirtualPosition),
}

/// Watches one virtual position until it hits its stop, its target, or a feed error
pub struct TradeMonitor {
    feed: Arc<dyn PriceFeed>,
    sink: Arc<dyn TradeLogSink>,
    request: MonitorRequest,
    config: MonitorConfig,
    position: Option<VirtualPosition>,
    ticks: u64,
}

impl TradeMonitor {
    /// Create a pending monitor; nothing is read until `open`
    pub fn new(
        feed: Arc<dyn PriceFeed>,
        sink: Arc<dyn TradeLogSink>,
        request: MonitorRequest,
        config: MonitorConfig,
    ) -> Result<Self> {
        request.validate()?;

        Ok(Self {
            feed,
            sink,
            request,
            config,
            position: None,
            ticks: 0,
        })
    }

    /// Create a monitor and open its position at the current quote
    pub async fn start(
        feed: Arc<dyn PriceFeed>,
        sink: Arc<dyn TradeLogSink>,
        request: MonitorRequest,
        config: MonitorConfig,
    ) -> Result<Self> {
        let mut monitor = Self::new(feed, sink, request, config)?;
        monitor.open().await?;
        Ok(monitor)
    }

    pub fn state(&self) -> MonitorState {
        match &self.position {
            None => MonitorState::Pending,
            Some(p) if p.is_open() => MonitorState::Open,
            Some(_) => MonitorState::Closed,
        }
    }

    pub fn position(&self) -> Option<&VirtualPosition> {
        self.position.as_ref()
    }

    /// Ticks evaluated since the position was opened
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Pending -> Open: read the entry quote and fix stop-loss and target
    ///
    /// A failed entry read leaves the monitor pending and logs nothing.
    pub async fn open(&mut self) -> Result<&VirtualPosition> {
        if let Some(position) = &self.position {
            return Err(Error::InvalidRequest(format!(
                "position {} for {} already opened",
                position.id, position.symbol
            )));
        }

        let entry = self.read_price().await?;
        let position = VirtualPosition::open(
            self.request.symbol.clone(),
            entry.close,
            &self.request.params,
            entry.timestamp,
        )?;

        tracing::info!(
            user = %self.request.user_id,
            symbol = %position.symbol,
            entry = %position.entry_price,
            stop_loss = %position.stop_loss_price,
            target = %position.target_price,
            lot_size = position.lot_size,
            "Opened virtual position"
        );

        Ok(self.position.insert(position))
    }

    /// Evaluate one quote against the open position
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        let position = self
            .position
            .as_ref()
            .ok_or_else(|| Error::InvalidRequest("monitor has not been opened".into()))?;
        if !position.is_open() {
            return Err(Error::PositionClosed(position.id));
        }

        let quote = self.read_price().await;
        self.ticks += 1;

        let price = match quote {
            Ok(point) => point.close,
            Err(e) if e.is_feed_failure() => {
                tracing::error!(
                    user = %self.request.user_id,
                    symbol = %self.request.symbol,
                    tick = self.ticks,
                    error = %e,
                    "Feed failed, closing position"
                );
                let record = self.close_on_error()?;
                return Ok(TickOutcome::Settled(self.persist(record, Some(e)).await));
            }
            Err(e) => return Err(e),
        };

        let position = self
            .position
            .as_mut()
            .ok_or_else(|| Error::InvalidRequest("monitor has not been opened".into()))?;

        let Some(reason) = position.should_exit(price) else {
            let unrealized_pnl = position.unrealized_pnl(price)?;
            tracing::debug!(
                symbol = %position.symbol,
                tick = self.ticks,
                price = %price,
                unrealized_pnl = %unrealized_pnl,
                "Holding"
            );
            return Ok(TickOutcome::Holding {
                price,
                unrealized_pnl,
            });
        };

        let (exit_price, pnl) = position.settle(reason, price, self.config.settlement)?;
        tracing::info!(
            user = %self.request.user_id,
            symbol = %position.symbol,
            status = %position.status,
            tick_price = %price,
            exit_price = %exit_price,
            profit_loss = %pnl,
            "Position settled"
        );

        let record = position.record(&self.request.user_id, Some(exit_price), Some(pnl), Utc::now());
        Ok(TickOutcome::Settled(self.persist(record, None).await))
    }

    /// Poll until the position settles or `cancel` flips to true
    ///
    /// Dropping the sender side of `cancel` also stops the loop.
    pub async fn run(&mut self, mut cancel: watch::Receiver<bool>) -> Result<MonitorOutcome> {
        if self.position.is_none() {
            self.open().await?;
        }

        loop {
            if *cancel.borrow() {
                return self.cancelled();
            }

            if let TickOutcome::Settled(settlement) = self.tick().await? {
                return Ok(MonitorOutcome::Settled(settlement));
            }

            tokio::select! {
                _ = sleep(self.config.poll_interval) => {}
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return self.cancelled();
                    }
                }
            }
        }
    }

    fn cancelled(&self) -> Result<MonitorOutcome> {
        let position = self
            .position
            .clone()
            .ok_or_else(|| Error::InvalidRequest("monitor has not been opened".into()))?;

        tracing::info!(
            symbol = %position.symbol,
            ticks = self.ticks,
            "Monitoring cancelled, position left open"
        );
        Ok(MonitorOutcome::Cancelled(position))
    }

    async fn read_price(&self) -> Result<PricePoint> {
        let symbol = &self.request.symbol;
        match timeout(self.config.feed_timeout, self.feed.latest_close(symbol)).await {
            Ok(result) => result,
            Err(_) => Err(Error::FeedTimeout {
                symbol: symbol.clone(),
                after: self.config.feed_timeout,
            }),
        }
    }

    fn close_on_error(&mut self) -> Result<TradeRecord> {
        let position = self
            .position
            .as_mut()
            .ok_or_else(|| Error::InvalidRequest("monitor has not been opened".into()))?;
        position.fail()?;
        Ok(position.record(&self.request.user_id, None, None, Utc::now()))
    }

    async fn persist(&self, record: TradeRecord, cause: Option<Error>) -> Settlement {
        let persisted = self.sink.append(&record).await;

        if let Err(e) = &persisted {
            // Keep every field in the log so the trade can be re-entered by hand
            tracing::error!(
                error = %e,
                user = %record.user_id,
                symbol = %record.symbol,
                entry = %record.entry_price,
                stop_loss = %record.stop_loss_price,
                target = %record.target_price,
                exit = ?record.exit_price,
                profit_loss = ?record.profit_loss,
                status = %record.status,
                timestamp = %record.timestamp,
                "Trade settled but not persisted"
            );
        }

        Settlement {
            record,
            persisted,
            cause,
        }
    }
}

/// A monitor running on its own task
pub struct MonitorHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<Result<MonitorOutcome>>,
}

impl MonitorHandle {
    /// Stop before the next tick; a tick already in flight still completes
    pub fn cancel(&self) {
        // The task may already be gone
        let _ = self.cancel.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task without giving up the handle
    ///
    /// Safe to use as a `select!` branch. Once it has resolved, do not await
    /// it or `join` again.
    pub async fn finished(&mut self) -> Result<MonitorOutcome> {
        (&mut self.task).await.map_err(|e| Error::Task(e.to_string()))?
    }

    pub async fn join(self) -> Result<MonitorOutcome> {
        let MonitorHandle { cancel, task } = self;
        let outcome = task.await.map_err(|e| Error::Task(e.to_string()))?;
        drop(cancel);
        outcome
    }
}

/// Run a monitor on a dedicated tokio task
pub fn spawn_monitor(mut monitor: TradeMonitor) -> MonitorHandle {
    let (cancel, cancel_rx) = watch::channel(false);
    let task = tokio::spawn(async move { monitor.run(cancel_rx).await });

    MonitorHandle { cancel, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::price_feed::{ScriptStep, ScriptedFeed};
    use crate::models::PositionStatus;
    use crate::persistence::MemorySink;

    fn request(lot: u32) -> MonitorRequest {
        MonitorRequest::new(
            "alice",
            "RELIANCE.NS",
            TradeParams::new(lot, Decimal::from(10), Decimal::from(25)),
        )
    }

    fn prices(values: &[i64]) -> Arc<ScriptedFeed> {
        Arc::new(ScriptedFeed::from_prices(values.iter().map(|&v| Decimal::from(v))))
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_loss_sequence() {
        let sink = Arc::new(MemorySink::new());
        let mut monitor = TradeMonitor::start(prices(&[100, 95, 89]), sink.clone(), request(10), MonitorConfig::default())
            .await
            .unwrap();

        assert!(matches!(monitor.tick().await.unwrap(), TickOutcome::Holding { .. }));
        let TickOutcome::Settled(settlement) = monitor.tick().await.unwrap() else {
            panic!("expected settlement on the second tick");
        };

        assert_eq!(monitor.ticks(), 2);
        assert_eq!(monitor.state(), MonitorState::Closed);
        assert_eq!(settlement.record.status, PositionStatus::ClosedStop);
        assert_eq!(settlement.record.profit_loss, Some(Decimal::from((100 - 90) * 10)));
        assert_eq!(settlement.record.exit_price, Some(Decimal::from(90)));
        assert!(settlement.is_persisted());
        assert_eq!(sink.read_all("alice").await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_sequence() {
        let sink = Arc::new(MemorySink::new());
        let mut monitor = TradeMonitor::new(prices(&[100, 110, 126]), sink.clone(), request(3), MonitorConfig::default())
            .unwrap();
        assert_eq!(monitor.state(), MonitorState::Pending);

        let (_tx, rx) = watch::channel(false);
        let MonitorOutcome::Settled(settlement) = monitor.run(rx).await.unwrap() else {
            panic!("expected settlement");
        };

        assert_eq!(settlement.record.status, PositionStatus::ClosedTarget);
        assert_eq!(settlement.record.profit_loss, Some(Decimal::from((125 - 100) * 3)));
        assert_eq!(monitor.ticks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_waits_between_ticks() {
        let sink = Arc::new(MemorySink::new());
        let mut monitor = TradeMonitor::new(prices(&[100, 101, 102, 126]), sink, request(1), MonitorConfig::default())
            .unwrap();

        let started = tokio::time::Instant::now();
        let (_tx, rx) = watch::channel(false);
        monitor.run(rx).await.unwrap();

        // Three ticks, two waits in between
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_failure_closes_with_single_error_record() {
        let feed = Arc::new(ScriptedFeed::new(vec![
            ScriptStep::Price(Decimal::from(100)),
            ScriptStep::Price(Decimal::from(98)),
            ScriptStep::Unavailable("connection reset".into()),
            ScriptStep::Price(Decimal::from(80)),
        ]));
        let sink = Arc::new(MemorySink::new());
        let mut monitor = TradeMonitor::new(feed.clone(), sink.clone(), request(1), MonitorConfig::default()).unwrap();

        let (_tx, rx) = watch::channel(false);
        let MonitorOutcome::Settled(settlement) = monitor.run(rx).await.unwrap() else {
            panic!("expected settlement");
        };

        assert_eq!(settlement.record.status, PositionStatus::ClosedError);
        assert!(settlement.record.profit_loss.is_none());
        assert!(matches!(settlement.cause, Some(Error::FeedUnavailable { .. })));

        let records = sink.read_all("alice").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, PositionStatus::ClosedError);

        // Closed positions ignore further ticks
        assert!(matches!(monitor.tick().await, Err(Error::PositionClosed(_))));
        assert_eq!(feed.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_timeout_is_feed_failure() {
        let feed = Arc::new(ScriptedFeed::new(vec![
            ScriptStep::Price(Decimal::from(100)),
            ScriptStep::Hang,
        ]));
        let sink = Arc::new(MemorySink::new());
        let mut monitor = TradeMonitor::start(feed, sink.clone(), request(1), MonitorConfig::default())
            .await
            .unwrap();

        let TickOutcome::Settled(settlement) = monitor.tick().await.unwrap() else {
            panic!("expected timeout to settle the position");
        };
        assert_eq!(settlement.record.status, PositionStatus::ClosedError);
        assert!(matches!(settlement.cause, Some(Error::FeedTimeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_data_is_reported_with_settlement() {
        let feed = Arc::new(ScriptedFeed::new(vec![
            ScriptStep::Price(Decimal::from(100)),
            ScriptStep::Missing,
        ]));
        let sink = Arc::new(MemorySink::new());
        let mut monitor = TradeMonitor::start(feed, sink.clone(), request(1), MonitorConfig::default())
            .await
            .unwrap();

        let TickOutcome::Settled(settlement) = monitor.tick().await.unwrap() else {
            panic!("expected missing data to settle the position");
        };
        assert!(settlement.is_persisted());
        assert_eq!(settlement.record.status, PositionStatus::ClosedError);
        assert!(matches!(
            settlement.cause,
            Some(Error::FeedDataMissing { ref symbol }) if symbol == "RELIANCE.NS"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_failure_opens_nothing() {
        let feed = Arc::new(ScriptedFeed::new(vec![ScriptStep::Missing]));
        let sink = Arc::new(MemorySink::new());
        let mut monitor = TradeMonitor::new(feed, sink.clone(), request(1), MonitorConfig::default()).unwrap();

        let result = monitor.open().await;
        assert!(matches!(result, Err(Error::FeedDataMissing { .. })));
        assert_eq!(monitor.state(), MonitorState::Pending);
        assert!(sink.read_all("alice").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_leaves_position_open() {
        let feed = Arc::new(ScriptedFeed::from_prices([Decimal::from(100)]).holding_last());
        let sink = Arc::new(MemorySink::new());
        let monitor = TradeMonitor::new(feed, sink.clone(), request(1), MonitorConfig::default()).unwrap();

        let handle = spawn_monitor(monitor);
        tokio::time::sleep(Duration::from_secs(12)).await;
        handle.cancel();

        let MonitorOutcome::Cancelled(position) = handle.join().await.unwrap() else {
            panic!("expected cancellation");
        };
        assert_eq!(position.status, PositionStatus::Open);
        assert!(sink.read_all("alice").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_can_lose_a_select_and_still_join() {
        let feed = Arc::new(ScriptedFeed::from_prices([Decimal::from(100)]).holding_last());
        let sink = Arc::new(MemorySink::new());
        let monitor = TradeMonitor::start(feed, sink, request(1), MonitorConfig::default())
            .await
            .unwrap();

        let mut handle = spawn_monitor(monitor);
        let outcome = tokio::select! {
            joined = handle.finished() => joined.unwrap(),
            _ = tokio::time::sleep(Duration::from_secs(12)) => {
                handle.cancel();
                handle.join().await.unwrap()
            }
        };

        assert!(matches!(outcome, MonitorOutcome::Cancelled(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_resolves_on_settlement() {
        let sink = Arc::new(MemorySink::new());
        let monitor = TradeMonitor::start(prices(&[100, 95, 126]), sink.clone(), request(1), MonitorConfig::default())
            .await
            .unwrap();

        let mut handle = spawn_monitor(monitor);
        let outcome = tokio::select! {
            joined = handle.finished() => joined.unwrap(),
            _ = tokio::time::sleep(Duration::from_secs(60)) => panic!("monitor should settle first"),
        };

        let MonitorOutcome::Settled(settlement) = outcome else {
            panic!("expected the target to fire");
        };
        assert_eq!(settlement.record.status, PositionStatus::ClosedTarget);
        assert_eq!(sink.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflowing_thresholds_open_nothing() {
        let sink = Arc::new(MemorySink::new());
        let mut req = request(1);
        req.params.target_pct = Decimal::MAX;
        let mut monitor = TradeMonitor::new(prices(&[100_000]), sink.clone(), req, MonitorConfig::default()).unwrap();

        let result = monitor.open().await;

        assert!(matches!(result, Err(Error::InvalidRequest(_))));
        assert_eq!(monitor.state(), MonitorState::Pending);
        assert!(sink.read_all("alice").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_price_settlement_mode() {
        let sink = Arc::new(MemorySink::new());
        let config = MonitorConfig {
            settlement: SettlementMode::TickPrice,
            ..MonitorConfig::default()
        };
        let mut monitor = TradeMonitor::new(prices(&[100, 95, 89]), sink, request(10), config).unwrap();

        let (_tx, rx) = watch::channel(false);
        let MonitorOutcome::Settled(settlement) = monitor.run(rx).await.unwrap() else {
            panic!("expected settlement");
        };
        assert_eq!(settlement.record.exit_price, Some(Decimal::from(89)));
        assert_eq!(settlement.record.profit_loss, Some(Decimal::from(-110)));
    }

    /// Sink that rejects every write
    struct ReadOnlySink;

    #[async_trait::async_trait]
    impl TradeLogSink for ReadOnlySink {
        async fn append(&self, record: &TradeRecord) -> Result<()> {
            Err(Error::SinkWriteFailure {
                user: record.user_id.clone(),
                reason: "read-only".into(),
            })
        }

        async fn read_all(&self, _user: &str) -> Result<Vec<TradeRecord>> {
            Ok(Vec::new())
        }

        fn name(&self) -> &str {
            "read-only"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failure_still_returns_record() {
        let mut monitor = TradeMonitor::start(
            prices(&[100, 89]),
            Arc::new(ReadOnlySink),
            request(2),
            MonitorConfig::default(),
        )
        .await
        .unwrap();

        let TickOutcome::Settled(settlement) = monitor.tick().await.unwrap() else {
            panic!("expected the stop-loss to fire");
        };
        assert!(matches!(settlement.persisted, Err(Error::SinkWriteFailure { .. })));
        assert!(settlement.cause.is_none());
        assert_eq!(settlement.record.status, PositionStatus::ClosedStop);
        assert_eq!(settlement.record.profit_loss, Some(Decimal::from(20)));
        assert_eq!(monitor.state(), MonitorState::Closed);
    }

    #[test]
    fn test_invalid_request_rejected() {
        let feed = prices(&[100]);
        let sink = Arc::new(MemorySink::new());
        let mut bad = request(1);
        bad.user_id = "  ".into();

        assert!(matches!(
            TradeMonitor::new(feed, sink, bad, MonitorConfig::default()),
            Err(Error::InvalidRequest(_))
        ));
    }
}
