use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{PositionStatus, TradeRecord, VirtualPosition};

/// Sizing and exit thresholds for a new virtual position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeParams {
    pub lot_size: u32,
    /// Percent below entry, e.g. 10 for a 10% stop
    pub stop_loss_pct: Decimal,
    /// Percent above entry
    pub target_pct: Decimal,
}

impl TradeParams {
    pub fn new(lot_size: u32, stop_loss_pct: Decimal, target_pct: Decimal) -> Self {
        Self {
            lot_size,
            stop_loss_pct,
            target_pct,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let hundred = Decimal::ONE_HUNDRED;

        if self.lot_size == 0 {
            return Err(Error::InvalidRequest("lot size must be at least 1".into()));
        }
        if self.stop_loss_pct <= Decimal::ZERO || self.stop_loss_pct >= hundred {
            return Err(Error::InvalidRequest(format!(
                "stop-loss must be between 0 and 100 percent, got {}",
                self.stop_loss_pct
            )));
        }
        if self.target_pct <= Decimal::ZERO {
            return Err(Error::InvalidRequest(format!(
                "target must be a positive percent, got {}",
                self.target_pct
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    Target,
}

/// Price a closed position is settled at
///
/// `Boundary` matches the long-standing behaviour: a stop-out is settled at
/// the stop-loss price and a target exit at the target price, whatever the
/// tick that crossed them. `TickPrice` settles at the crossing tick instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementMode {
    #[default]
    Boundary,
    TickPrice,
}

impl VirtualPosition {
    /// Open a position at `entry_price` with thresholds derived from `params`
    ///
    /// Fails with `InvalidRequest` when the thresholds do not fit in a `Decimal`.
    pub fn open(
        symbol: impl Into<String>,
        entry_price: Decimal,
        params: &TradeParams,
        opened_at: DateTime<Utc>,
    ) -> Result<Self> {
        let symbol = symbol.into();
        let stop_loss_price = scale_by_pct(entry_price, -params.stop_loss_pct)
            .ok_or_else(|| overflow(&symbol, "stop-loss price"))?;
        let target_price = scale_by_pct(entry_price, params.target_pct)
            .ok_or_else(|| overflow(&symbol, "target price"))?;

        Ok(Self {
            id: Uuid::new_v4(),
            symbol,
            entry_price,
            stop_loss_price,
            target_price,
            lot_size: params.lot_size,
            opened_at,
            status: PositionStatus::Open,
        })
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Check the exit thresholds against a quote
    pub fn should_exit(&self, price: Decimal) -> Option<ExitReason> {
        if price <= self.stop_loss_price {
            return Some(ExitReason::StopLoss);
        }
        if price >= self.target_price {
            return Some(ExitReason::Target);
        }
        None
    }

    /// Mark-to-market P&L at a quote
    pub fn unrealized_pnl(&self, price: Decimal) -> Result<Decimal> {
        self.lot_value(price.checked_sub(self.entry_price))
    }

    /// Close the position on an exit threshold
    ///
    /// Returns `(exit_price, profit_loss)`. In boundary mode a stop-out
    /// reports `(entry - stop) * lot`, the size of the loss at the stop.
    pub fn settle(
        &mut self,
        reason: ExitReason,
        tick_price: Decimal,
        mode: SettlementMode,
    ) -> Result<(Decimal, Decimal)> {
        if !self.is_open() {
            return Err(Error::PositionClosed(self.id));
        }

        let (status, exit_price, pnl) = match (reason, mode) {
            (ExitReason::StopLoss, SettlementMode::Boundary) => (
                PositionStatus::ClosedStop,
                self.stop_loss_price,
                self.lot_value(self.entry_price.checked_sub(self.stop_loss_price))?,
            ),
            (ExitReason::Target, SettlementMode::Boundary) => (
                PositionStatus::ClosedTarget,
                self.target_price,
                self.lot_value(self.target_price.checked_sub(self.entry_price))?,
            ),
            (ExitReason::StopLoss, SettlementMode::TickPrice) => (
                PositionStatus::ClosedStop,
                tick_price,
                self.unrealized_pnl(tick_price)?,
            ),
            (ExitReason::Target, SettlementMode::TickPrice) => (
                PositionStatus::ClosedTarget,
                tick_price,
                self.unrealized_pnl(tick_price)?,
            ),
        };

        self.status = status;
        Ok((exit_price, pnl))
    }

    fn lot_value(&self, per_share: Option<Decimal>) -> Result<Decimal> {
        per_share
            .and_then(|p| p.checked_mul(Decimal::from(self.lot_size)))
            .ok_or_else(|| overflow(&self.symbol, "profit/loss"))
    }

    /// Close the position after an unrecoverable feed error
    pub fn fail(&mut self) -> Result<()> {
        if !self.is_open() {
            return Err(Error::PositionClosed(self.id));
        }
        self.status = PositionStatus::ClosedError;
        Ok(())
    }

    /// Build the log record for a closed position
    pub fn record(
        &self,
        user_id: &str,
        exit_price: Option<Decimal>,
        profit_loss: Option<Decimal>,
        timestamp: DateTime<Utc>,
    ) -> TradeRecord {
        TradeRecord {
            user_id: user_id.to_string(),
            symbol: self.symbol.clone(),
            entry_price: self.entry_price,
            stop_loss_price: self.stop_loss_price,
            target_price: self.target_price,
            exit_price,
            profit_loss,
            status: self.status,
            timestamp,
        }
    }
}

/// `price * (1 + pct / 100)`, or `None` on overflow
fn scale_by_pct(price: Decimal, pct: Decimal) -> Option<Decimal> {
    let factor = Decimal::ONE.checked_add(pct.checked_div(Decimal::ONE_HUNDRED)?)?;
    price.checked_mul(factor)
}

fn overflow(symbol: &str, what: &str) -> Error {
    Error::InvalidRequest(format!("{} for {} is out of range", what, symbol))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(lot: u32) -> TradeParams {
        TradeParams::new(lot, Decimal::from(10), Decimal::from(25))
    }

    fn position(lot: u32) -> VirtualPosition {
        VirtualPosition::open("RELIANCE.NS", Decimal::from(100), &params(lot), Utc::now()).unwrap()
    }

    #[test]
    fn test_open_position_thresholds() {
        let position = position(1);

        assert_eq!(position.stop_loss_price, Decimal::new(9000, 2));
        assert_eq!(position.target_price, Decimal::new(12500, 2));
        assert_eq!(format!("{:.2}", position.stop_loss_price), "90.00");
        assert_eq!(format!("{:.2}", position.target_price), "125.00");
        assert_eq!(position.status, PositionStatus::Open);
    }

    #[test]
    fn test_fractional_percentages_are_exact() {
        let params = TradeParams::new(1, Decimal::new(25, 1), Decimal::new(75, 1));
        let position = VirtualPosition::open("TCS.NS", Decimal::new(345050, 2), &params, Utc::now()).unwrap();

        // 3450.50 * 0.975 and 3450.50 * 1.075
        assert_eq!(position.stop_loss_price, Decimal::new(336423750, 5));
        assert_eq!(position.target_price, Decimal::new(370928750, 5));
    }

    #[test]
    fn test_should_exit() {
        let position = position(1);

        assert_eq!(position.should_exit(Decimal::from(95)), None);
        assert_eq!(position.should_exit(Decimal::from(124)), None);
        assert_eq!(position.should_exit(Decimal::from(90)), Some(ExitReason::StopLoss));
        assert_eq!(position.should_exit(Decimal::from(89)), Some(ExitReason::StopLoss));
        assert_eq!(position.should_exit(Decimal::from(125)), Some(ExitReason::Target));
        assert_eq!(position.should_exit(Decimal::from(126)), Some(ExitReason::Target));
    }

    #[test]
    fn test_stop_settles_at_boundary() {
        let mut position = position(50);

        let (exit, pnl) = position
            .settle(ExitReason::StopLoss, Decimal::from(89), SettlementMode::Boundary)
            .unwrap();

        assert_eq!(exit, Decimal::from(90));
        assert_eq!(pnl, Decimal::from((100 - 90) * 50));
        assert_eq!(position.status, PositionStatus::ClosedStop);
    }

    #[test]
    fn test_target_settles_at_boundary() {
        let mut position = position(4);

        let (exit, pnl) = position
            .settle(ExitReason::Target, Decimal::from(126), SettlementMode::Boundary)
            .unwrap();

        assert_eq!(exit, Decimal::from(125));
        assert_eq!(pnl, Decimal::from((125 - 100) * 4));
        assert_eq!(position.status, PositionStatus::ClosedTarget);
    }

    #[test]
    fn test_tick_price_settlement_is_signed() {
        let mut stopped = position(2);
        let (exit, pnl) = stopped
            .settle(ExitReason::StopLoss, Decimal::from(89), SettlementMode::TickPrice)
            .unwrap();
        assert_eq!(exit, Decimal::from(89));
        assert_eq!(pnl, Decimal::from(-22));

        let mut hit = position(2);
        let (exit, pnl) = hit
            .settle(ExitReason::Target, Decimal::from(126), SettlementMode::TickPrice)
            .unwrap();
        assert_eq!(exit, Decimal::from(126));
        assert_eq!(pnl, Decimal::from(52));
    }

    #[test]
    fn test_cannot_close_twice() {
        let mut position = position(1);
        position.fail().unwrap();
        assert_eq!(position.status, PositionStatus::ClosedError);

        assert!(position.fail().is_err());
        let result = position.settle(ExitReason::Target, Decimal::from(130), SettlementMode::Boundary);
        assert!(matches!(result, Err(Error::PositionClosed(_))));
        assert_eq!(position.status, PositionStatus::ClosedError);
    }

    #[test]
    fn test_open_rejects_target_beyond_decimal_range() {
        let params = TradeParams::new(1, Decimal::from(5), Decimal::MAX);
        let result = VirtualPosition::open("RELIANCE.NS", Decimal::from(100_000), &params, Utc::now());

        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_settle_rejects_overflowing_profit() {
        let params = TradeParams::new(u32::MAX, Decimal::from(5), Decimal::from(10));
        let entry = Decimal::MAX / Decimal::from(4);
        let mut position = VirtualPosition::open("RELIANCE.NS", entry, &params, Utc::now()).unwrap();

        let result = position.settle(ExitReason::Target, entry, SettlementMode::Boundary);

        assert!(matches!(result, Err(Error::InvalidRequest(_))));
        assert!(position.is_open());
        assert!(matches!(position.unrealized_pnl(Decimal::ZERO), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_params_validation() {
        assert!(params(1).validate().is_ok());
        assert!(params(0).validate().is_err());
        assert!(TradeParams::new(1, Decimal::ZERO, Decimal::from(5)).validate().is_err());
        assert!(TradeParams::new(1, Decimal::from(100), Decimal::from(5)).validate().is_err());
        assert!(TradeParams::new(1, Decimal::from(5), Decimal::ZERO).validate().is_err());
    }

    #[test]
    fn test_error_record_has_no_settlement() {
        let mut position = position(1);
        position.fail().unwrap();

        let record = position.record("alice", None, None, Utc::now());
        assert_eq!(record.status, PositionStatus::ClosedError);
        assert!(record.exit_price.is_none());
        assert!(record.profit_loss.is_none());
        assert_eq!(record.user_id, "alice");
    }
}
