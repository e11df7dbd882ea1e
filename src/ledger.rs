//! Account and position ledger.
//!
//! All mutations for one account flow through a single `Ledger` value,
//! which callers keep behind one lock: weighted-average cost math is only
//! correct when fills are applied in strict event order.

use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::error;

use crate::error::{Error, Result};
use crate::types::{Account, Position, Symbol, now_millis};

pub struct Ledger {
    account: Account,
    positions: HashMap<Symbol, Position>,
    /// Realized PnL of positions already closed out, so attribution
    /// survives position removal at zero quantity.
    session_realized_pnl: Decimal,
    /// Equity at session open, for the daily-loss check.
    session_open_equity: Decimal,
    /// Leverage ceiling used for buying power / margin fields.
    leverage_limit: Decimal,
}

impl Ledger {
    pub fn new(initial_cash: Decimal, leverage_limit: Decimal) -> Self {
        Self {
            account: Account::new(initial_cash),
            positions: HashMap::new(),
            session_realized_pnl: Decimal::ZERO,
            session_open_equity: initial_cash,
            leverage_limit,
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn positions(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }

    pub fn position(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn held_quantity(&self, symbol: &Symbol) -> Decimal {
        self.positions
            .get(symbol)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn equity(&self) -> Decimal {
        self.account.equity
    }

    pub fn buying_power(&self) -> Decimal {
        self.account.buying_power
    }

    /// Sum of |quantity| * last price across positions.
    pub fn gross_exposure(&self) -> Decimal {
        self.positions
            .values()
            .map(|p| p.market_value().abs())
            .sum()
    }

    /// Realized PnL including closed-out positions.
    pub fn realized_pnl(&self) -> Decimal {
        self.session_realized_pnl
            + self
                .positions
                .values()
                .map(|p| p.realized_pnl)
                .sum::<Decimal>()
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.unrealized_pnl).sum()
    }

    pub fn total_pnl(&self) -> Decimal {
        self.realized_pnl() + self.unrealized_pnl()
    }

    /// Equity change since session open; negative means a loss.
    pub fn daily_pnl(&self) -> Decimal {
        self.account.equity - self.session_open_equity
    }

    pub fn set_leverage_limit(&mut self, limit: Decimal) {
        self.leverage_limit = limit;
        self.refresh_account();
    }

    /// Restart day tracking from current equity.
    pub fn reset_daily(&mut self) {
        self.session_open_equity = self.account.equity;
    }

    /// Apply a buy fill: weighted-average cost, cash out.
    /// `price_dp` is the symbol's tick-size scale; the stored average
    /// price is rounded to it.
    pub fn apply_buy(
        &mut self,
        symbol: &Symbol,
        quantity: Decimal,
        price: Decimal,
        commission: Decimal,
        price_dp: u32,
    ) {
        let position = self
            .positions
            .entry(symbol.clone())
            .or_insert_with(|| Position::new(symbol.clone()));

        let total_cost = position.quantity * position.average_price + quantity * price;
        let total_quantity = position.quantity + quantity;
        if total_quantity > Decimal::ZERO {
            position.average_price = (total_cost / total_quantity).round_dp(price_dp);
        }
        position.quantity += quantity;
        if position.last_price.is_zero() {
            position.last_price = price;
        }
        position.unrealized_pnl = (position.last_price - position.average_price) * position.quantity;
        position.updated_at = now_millis();

        self.account.cash -= quantity * price + commission;
        self.refresh_account();
    }

    /// Apply a sell fill. Fails with `InsufficientShares` (no state change)
    /// when the held quantity does not cover the sale; a short position is
    /// never created here. Realized PnL accrues against the average cost;
    /// the average cost itself is untouched by sells.
    pub fn apply_sell(
        &mut self,
        symbol: &Symbol,
        quantity: Decimal,
        price: Decimal,
        commission: Decimal,
    ) -> Result<()> {
        let held = self.held_quantity(symbol);
        if held < quantity {
            return Err(Error::InsufficientShares {
                held,
                requested: quantity,
            });
        }
        let position = self
            .positions
            .get_mut(symbol)
            .expect("held quantity > 0 implies the position exists");

        position.realized_pnl += (price - position.average_price) * quantity;
        position.quantity -= quantity;
        position.unrealized_pnl = (position.last_price - position.average_price) * position.quantity;
        position.updated_at = now_millis();

        if position.quantity.is_zero() {
            // Fold realized PnL into the session counter before dropping
            // the record, so attribution survives.
            self.session_realized_pnl += position.realized_pnl;
            self.positions.remove(symbol);
        } else if position.quantity < Decimal::ZERO {
            // Unreachable given the guard above; a negative quantity here
            // is ledger corruption, not a user error.
            error!(%symbol, quantity = %position.quantity, "position went negative");
            debug_assert!(false, "position went negative without short selling");
            return Err(Error::Internal(format!(
                "position {symbol} went negative"
            )));
        }

        self.account.cash += quantity * price - commission;
        self.refresh_account();
        Ok(())
    }

    /// Revalue one symbol against a new market price. Eager and
    /// synchronous: equity is recomputed before this returns, so it is
    /// never served stale once a newer tick has arrived.
    pub fn mark_to_market(&mut self, symbol: &Symbol, price: Decimal) {
        if let Some(position) = self.positions.get_mut(symbol) {
            position.last_price = price;
            position.unrealized_pnl = (price - position.average_price) * position.quantity;
            position.updated_at = now_millis();
        }
        self.refresh_account();
    }

    fn refresh_account(&mut self) {
        let market_value: Decimal = self.positions.values().map(|p| p.market_value()).sum();
        let exposure = self.gross_exposure();
        self.account.equity = self.account.cash + market_value;
        self.account.margin_used = (-self.account.cash).max(Decimal::ZERO);
        self.account.margin_available =
            (self.leverage_limit * self.account.equity - exposure).max(Decimal::ZERO);
        self.account.buying_power = self.account.margin_available;
        self.account.updated_at = now_millis();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn ledger() -> Ledger {
        // Cash account: leverage 1 means buying power == cash headroom.
        Ledger::new(d("100000"), Decimal::ONE)
    }

    fn sym() -> Symbol {
        Symbol::new("AAPL")
    }

    #[test]
    fn buy_moves_cash_and_sets_average() {
        let mut l = ledger();
        l.apply_buy(&sym(), d("100"), d("150"), Decimal::ZERO, 2);
        assert_eq!(l.account().cash, d("85000"));
        let p = l.position(&sym()).unwrap();
        assert_eq!(p.quantity, d("100"));
        assert_eq!(p.average_price, d("150"));
    }

    #[test]
    fn weighted_average_on_second_buy() {
        let mut l = ledger();
        l.apply_buy(&sym(), d("100"), d("150"), Decimal::ZERO, 2);
        l.apply_buy(&sym(), d("50"), d("160"), Decimal::ZERO, 2);
        let p = l.position(&sym()).unwrap();
        assert_eq!(p.quantity, d("150"));
        // (100*150 + 50*160) / 150 = 153.333... → 153.33 at 2dp
        assert_eq!(p.average_price, d("153.33"));
        assert_eq!(l.account().cash, d("77000"));
    }

    #[test]
    fn sell_realizes_pnl_and_leaves_average() {
        let mut l = ledger();
        l.apply_buy(&sym(), d("100"), d("150"), Decimal::ZERO, 2);
        l.apply_buy(&sym(), d("50"), d("160"), Decimal::ZERO, 2);
        l.mark_to_market(&sym(), d("160"));
        l.apply_sell(&sym(), d("50"), d("160"), Decimal::ZERO).unwrap();
        let p = l.position(&sym()).unwrap();
        assert_eq!(p.quantity, d("100"));
        assert_eq!(p.average_price, d("153.33"));
        assert_eq!(p.realized_pnl, d("333.50"));
        assert_eq!(l.account().cash, d("85000"));
    }

    #[test]
    fn mark_to_market_updates_unrealized_only() {
        let mut l = ledger();
        l.apply_buy(&sym(), d("100"), d("150"), Decimal::ZERO, 2);
        l.mark_to_market(&sym(), d("160"));
        let p = l.position(&sym()).unwrap();
        assert_eq!(p.unrealized_pnl, d("1000"));
        assert_eq!(p.realized_pnl, Decimal::ZERO);
        assert_eq!(l.equity(), d("101000"));
    }

    #[test]
    fn scenario_from_reference() {
        let mut l = ledger();
        l.apply_buy(&sym(), d("100"), d("150"), Decimal::ZERO, 2);
        assert_eq!(l.account().cash, d("85000"));
        l.apply_buy(&sym(), d("50"), d("160"), Decimal::ZERO, 2);
        assert_eq!(l.account().cash, d("77000"));
        l.mark_to_market(&sym(), d("160"));
        // (160 - 153.33) * 150 = 1000.50
        assert_eq!(l.position(&sym()).unwrap().unrealized_pnl, d("1000.50"));
        l.apply_sell(&sym(), d("50"), d("160"), Decimal::ZERO).unwrap();
        let p = l.position(&sym()).unwrap();
        assert_eq!(p.quantity, d("100"));
        assert_eq!(p.realized_pnl, d("333.50"));
    }

    #[test]
    fn oversell_is_rejected_without_state_change() {
        let mut l = ledger();
        l.apply_buy(&sym(), d("100"), d("150"), Decimal::ZERO, 2);
        let err = l.apply_sell(&sym(), d("150"), d("160"), Decimal::ZERO);
        assert!(matches!(err, Err(Error::InsufficientShares { .. })));
        assert_eq!(l.position(&sym()).unwrap().quantity, d("100"));
        assert_eq!(l.account().cash, d("85000"));
    }

    #[test]
    fn closing_position_removes_record_but_keeps_attribution() {
        let mut l = ledger();
        l.apply_buy(&sym(), d("100"), d("150"), Decimal::ZERO, 2);
        l.apply_sell(&sym(), d("100"), d("155"), Decimal::ZERO).unwrap();
        assert!(l.position(&sym()).is_none());
        assert_eq!(l.realized_pnl(), d("500"));
        assert_eq!(l.account().cash, d("100500"));
    }

    #[test]
    fn commission_moves_with_cash() {
        let mut l = ledger();
        l.apply_buy(&sym(), d("10"), d("100"), d("1.50"), 2);
        assert_eq!(l.account().cash, d("98998.50"));
        l.apply_sell(&sym(), d("10"), d("100"), d("1.50")).unwrap();
        assert_eq!(l.account().cash, d("99997.00"));
    }

    #[test]
    fn daily_pnl_tracks_session_open() {
        let mut l = ledger();
        l.apply_buy(&sym(), d("100"), d("150"), Decimal::ZERO, 2);
        l.mark_to_market(&sym(), d("140"));
        assert_eq!(l.daily_pnl(), d("-1000"));
        l.reset_daily();
        assert_eq!(l.daily_pnl(), Decimal::ZERO);
    }

    #[test]
    fn buying_power_scales_with_leverage() {
        let mut l = Ledger::new(d("100000"), d("2"));
        assert_eq!(l.buying_power(), d("200000"));
        l.apply_buy(&sym(), d("100"), d("150"), Decimal::ZERO, 2);
        l.mark_to_market(&sym(), d("150"));
        // equity still 100k, exposure 15k → 185k headroom
        assert_eq!(l.buying_power(), d("185000"));
    }
}
