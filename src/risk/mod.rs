//! Risk Engine - pre-trade gating and post-trade surveillance
//!
//! Pre-trade checks are blocking: a breach rejects the order before any
//! state mutation. Post-trade checks are advisory: they run after every
//! fill or mark-to-market, append to a bounded violation log, and never
//! undo the state change that triggered them.

pub mod analytics;

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::types::{Order, Side, Timestamp, now_millis};

/// Violations kept in memory; oldest are dropped beyond this.
const VIOLATION_LOG_CAP: usize = 256;

/// Risk limits, supplied at session start and updatable at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Max notional of a single position
    pub max_position_size: Decimal,
    /// Max loss since session open before violations fire
    pub max_daily_loss: Decimal,
    /// Max peak-to-trough equity decline (fraction)
    pub max_drawdown: Decimal,
    /// Max gross exposure / equity
    pub max_leverage: Decimal,
    /// Advisory ceiling for position value / portfolio value
    pub max_concentration: Decimal,
    /// Policy ceiling for a position as a fraction of equity; the tighter
    /// of this and `max_position_size` governs
    pub position_equity_fraction: Decimal,
    pub allow_short_selling: bool,
    pub allow_options: bool,
    pub allow_futures: bool,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size: Decimal::from(100_000),
            max_daily_loss: Decimal::from(5_000),
            max_drawdown: Decimal::new(1, 1),            // 0.10
            max_leverage: Decimal::from(2),
            max_concentration: Decimal::new(25, 2),      // 0.25
            position_equity_fraction: Decimal::new(25, 2),
            allow_short_selling: false,
            allow_options: false,
            allow_futures: false,
        }
    }
}

/// What a violation breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    PositionSize,
    DailyLoss,
    Drawdown,
    Leverage,
    Concentration,
    Margin,
    ShortSelling,
}

/// An observed limit breach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskViolation {
    pub kind: ViolationKind,
    pub message: String,
    pub current_value: Decimal,
    pub limit_value: Decimal,
    pub timestamp: Timestamp,
}

impl RiskViolation {
    fn new(kind: ViolationKind, message: String, current: Decimal, limit: Decimal) -> Self {
        Self {
            kind,
            message,
            current_value: current,
            limit_value: limit,
            timestamp: now_millis(),
        }
    }
}

/// Portfolio risk snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RiskMetrics {
    pub total_pnl: Decimal,
    pub daily_pnl: Decimal,
    pub portfolio_value: Decimal,
    pub leverage: Decimal,
    pub margin_used: Decimal,
    pub margin_available: Decimal,
    pub max_drawdown: f64,
    pub current_drawdown: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
}

/// Risk Engine - evaluates orders and portfolio state against limits.
pub struct RiskEngine {
    limits: RwLock<RiskLimits>,
    violations: Mutex<VecDeque<RiskViolation>>,
    peak_equity: Mutex<Decimal>,
    equity_curve: Mutex<Vec<f64>>,
}

impl RiskEngine {
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            limits: RwLock::new(limits),
            violations: Mutex::new(VecDeque::new()),
            peak_equity: Mutex::new(Decimal::ZERO),
            equity_curve: Mutex::new(Vec::new()),
        }
    }

    pub fn limits(&self) -> RiskLimits {
        self.limits.read().clone()
    }

    pub fn set_limits(&self, limits: RiskLimits) {
        *self.limits.write() = limits;
    }

    /// Blocking pre-trade check. Pure over the ledger snapshot: any breach
    /// rejects the order before any state mutation.
    pub fn check_order(&self, order: &Order, ref_price: Decimal, ledger: &Ledger) -> Result<()> {
        let limits = self.limits.read();
        let notional = order.quantity * ref_price;
        let equity = ledger.equity();
        let held = ledger.held_quantity(&order.symbol);

        // 1. Buying power must cover buy notional.
        if order.side == Side::Buy {
            let buying_power = ledger.buying_power();
            if notional > buying_power {
                return Err(Error::InsufficientFunds {
                    required: notional,
                    available: buying_power,
                });
            }
        }

        // 2. Short selling requires the explicit allowance.
        if order.side == Side::Sell && order.quantity > held && !limits.allow_short_selling {
            return Err(Error::RiskRejected {
                kind: ViolationKind::ShortSelling,
                message: format!(
                    "sell {} exceeds held {} and short selling is disabled",
                    order.quantity, held
                ),
            });
        }

        // 3. Position ceiling: the tighter of the absolute cap and the
        //    equity-fraction policy governs. Only risk-increasing orders
        //    are gated.
        let resulting_qty = match order.side {
            Side::Buy => held + order.quantity,
            Side::Sell => held - order.quantity,
        };
        let resulting_notional = resulting_qty.abs() * ref_price;
        if resulting_notional > held.abs() * ref_price {
            let ceiling = limits
                .max_position_size
                .min(limits.position_equity_fraction * equity);
            if resulting_notional > ceiling {
                return Err(Error::RiskRejected {
                    kind: ViolationKind::PositionSize,
                    message: format!(
                        "resulting position {resulting_notional} exceeds ceiling {ceiling}"
                    ),
                });
            }
        }

        // 4. Leverage: post-trade gross exposure over equity.
        let current_sym_exposure = held.abs() * ref_price;
        let post_exposure = ledger.gross_exposure() - current_sym_exposure + resulting_notional;
        if equity <= Decimal::ZERO {
            return Err(Error::RiskRejected {
                kind: ViolationKind::Leverage,
                message: "equity is not positive".into(),
            });
        }
        if post_exposure / equity > limits.max_leverage {
            return Err(Error::RiskRejected {
                kind: ViolationKind::Leverage,
                message: format!(
                    "post-trade leverage {} exceeds {}",
                    post_exposure / equity,
                    limits.max_leverage
                ),
            });
        }

        Ok(())
    }

    /// Advisory post-trade check: runs after every fill or mark-to-market.
    /// Breaches are logged and returned for publication; the triggering
    /// state change stands.
    pub fn check_portfolio(&self, ledger: &Ledger) -> Vec<RiskViolation> {
        let limits = self.limits.read();
        let mut found = Vec::new();
        let equity = ledger.equity();

        let daily_loss = -ledger.daily_pnl();
        if daily_loss > limits.max_daily_loss {
            found.push(RiskViolation::new(
                ViolationKind::DailyLoss,
                format!("daily loss {daily_loss} exceeds {}", limits.max_daily_loss),
                daily_loss,
                limits.max_daily_loss,
            ));
        }

        let peak = *self.peak_equity.lock();
        if peak > Decimal::ZERO && equity < peak {
            let drawdown = (peak - equity) / peak;
            if drawdown > limits.max_drawdown {
                found.push(RiskViolation::new(
                    ViolationKind::Drawdown,
                    format!("drawdown {drawdown} exceeds {}", limits.max_drawdown),
                    drawdown,
                    limits.max_drawdown,
                ));
            }
        }

        if equity > Decimal::ZERO {
            for position in ledger.positions() {
                let concentration = position.market_value().abs() / equity;
                if concentration > limits.max_concentration {
                    found.push(RiskViolation::new(
                        ViolationKind::Concentration,
                        format!(
                            "{} is {concentration} of portfolio, limit {}",
                            position.symbol, limits.max_concentration
                        ),
                        concentration,
                        limits.max_concentration,
                    ));
                }
            }
        }

        let account = ledger.account();
        if account.margin_used > account.margin_available {
            found.push(RiskViolation::new(
                ViolationKind::Margin,
                format!(
                    "margin used {} exceeds available {}",
                    account.margin_used, account.margin_available
                ),
                account.margin_used,
                account.margin_available,
            ));
        }

        if !found.is_empty() {
            let mut log = self.violations.lock();
            for v in &found {
                if log.len() == VIOLATION_LOG_CAP {
                    log.pop_front();
                }
                log.push_back(v.clone());
            }
        }
        found
    }

    /// Record an equity observation: feeds the peak for drawdown checks
    /// and the curve behind volatility/Sharpe metrics.
    pub fn record_equity(&self, equity: Decimal) {
        let mut peak = self.peak_equity.lock();
        if equity > *peak {
            *peak = equity;
        }
        self.equity_curve
            .lock()
            .push(equity.to_f64().unwrap_or(0.0));
    }

    pub fn violations(&self) -> Vec<RiskViolation> {
        self.violations.lock().iter().cloned().collect()
    }

    pub fn clear_violations(&self) {
        self.violations.lock().clear();
    }

    /// Snapshot of portfolio risk, combining ledger state with the
    /// recorded equity curve.
    pub fn metrics(&self, ledger: &Ledger) -> RiskMetrics {
        let curve = self.equity_curve.lock();
        let returns: Vec<f64> = curve
            .windows(2)
            .filter(|w| w[0] != 0.0)
            .map(|w| w[1] / w[0] - 1.0)
            .collect();
        let equity = ledger.equity();
        let account = ledger.account();
        let leverage = if equity > Decimal::ZERO {
            ledger.gross_exposure() / equity
        } else {
            Decimal::ZERO
        };
        RiskMetrics {
            total_pnl: ledger.total_pnl(),
            daily_pnl: ledger.daily_pnl(),
            portfolio_value: equity,
            leverage,
            margin_used: account.margin_used,
            margin_available: account.margin_available,
            max_drawdown: analytics::max_drawdown(&curve),
            current_drawdown: analytics::current_drawdown(&curve),
            volatility: analytics::volatility(&returns),
            sharpe_ratio: analytics::sharpe_ratio(&returns, 0.0),
        }
    }
}

impl Default for RiskEngine {
    fn default() -> Self {
        Self::new(RiskLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderId, OrderRequest};

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn order(side: Side, qty: &str) -> Order {
        Order::from_request(OrderId(1), &OrderRequest::market("AAPL", side, d(qty)))
    }

    fn cash_ledger() -> Ledger {
        Ledger::new(d("100000"), Decimal::ONE)
    }

    #[test]
    fn buy_beyond_buying_power_is_insufficient_funds() {
        let engine = RiskEngine::default();
        let ledger = cash_ledger();
        let err = engine.check_order(&order(Side::Buy, "1000"), d("150"), &ledger);
        assert!(matches!(err, Err(Error::InsufficientFunds { .. })));
    }

    #[test]
    fn position_ceiling_takes_the_tighter_bound() {
        let engine = RiskEngine::new(RiskLimits {
            max_position_size: d("1000000"),
            position_equity_fraction: d("0.10"), // 10k of 100k equity
            ..RiskLimits::default()
        });
        let ledger = cash_ledger();
        let err = engine.check_order(&order(Side::Buy, "100"), d("150"), &ledger);
        assert!(matches!(
            err,
            Err(Error::RiskRejected { kind: ViolationKind::PositionSize, .. })
        ));
        // 50 shares = 7.5k fits under the 10k fraction
        assert!(
            engine
                .check_order(&order(Side::Buy, "50"), d("150"), &ledger)
                .is_ok()
        );
    }

    #[test]
    fn short_selling_needs_allowance() {
        let engine = RiskEngine::default();
        let ledger = cash_ledger();
        let err = engine.check_order(&order(Side::Sell, "10"), d("150"), &ledger);
        assert!(matches!(
            err,
            Err(Error::RiskRejected { kind: ViolationKind::ShortSelling, .. })
        ));

        let mut limits = RiskLimits::default();
        limits.allow_short_selling = true;
        limits.position_equity_fraction = Decimal::ONE;
        engine.set_limits(limits);
        assert!(
            engine
                .check_order(&order(Side::Sell, "10"), d("150"), &ledger)
                .is_ok()
        );
    }

    #[test]
    fn leverage_cap_applies_post_trade() {
        let engine = RiskEngine::new(RiskLimits {
            max_leverage: Decimal::ONE,
            max_position_size: d("1000000"),
            position_equity_fraction: Decimal::from(10),
            ..RiskLimits::default()
        });
        // Margin account: buying power 2x cash, but leverage limit 1x.
        let ledger = Ledger::new(d("100000"), d("2"));
        let err = engine.check_order(&order(Side::Buy, "800"), d("150"), &ledger);
        assert!(matches!(
            err,
            Err(Error::RiskRejected { kind: ViolationKind::Leverage, .. })
        ));
    }

    #[test]
    fn daily_loss_violation_is_advisory() {
        let engine = RiskEngine::new(RiskLimits {
            max_daily_loss: d("500"),
            ..RiskLimits::default()
        });
        let mut ledger = cash_ledger();
        ledger.apply_buy(&"AAPL".into(), d("100"), d("150"), Decimal::ZERO, 2);
        ledger.mark_to_market(&"AAPL".into(), d("140"));
        let found = engine.check_portfolio(&ledger);
        assert!(found.iter().any(|v| v.kind == ViolationKind::DailyLoss));
        assert_eq!(engine.violations().len(), found.len());
    }

    #[test]
    fn drawdown_violation_after_peak_decline() {
        let engine = RiskEngine::new(RiskLimits {
            max_drawdown: d("0.05"),
            ..RiskLimits::default()
        });
        let mut ledger = cash_ledger();
        ledger.apply_buy(&"AAPL".into(), d("100"), d("150"), Decimal::ZERO, 2);
        ledger.mark_to_market(&"AAPL".into(), d("160"));
        engine.record_equity(ledger.equity()); // peak 101000
        ledger.mark_to_market(&"AAPL".into(), d("80"));
        engine.record_equity(ledger.equity());
        let found = engine.check_portfolio(&ledger);
        assert!(found.iter().any(|v| v.kind == ViolationKind::Drawdown));
    }

    #[test]
    fn violation_log_is_bounded() {
        let engine = RiskEngine::new(RiskLimits {
            max_daily_loss: d("1"),
            ..RiskLimits::default()
        });
        let mut ledger = cash_ledger();
        ledger.apply_buy(&"AAPL".into(), d("100"), d("150"), Decimal::ZERO, 2);
        ledger.mark_to_market(&"AAPL".into(), d("100"));
        for _ in 0..(VIOLATION_LOG_CAP + 50) {
            engine.check_portfolio(&ledger);
        }
        assert_eq!(engine.violations().len(), VIOLATION_LOG_CAP);
        engine.clear_violations();
        assert!(engine.violations().is_empty());
    }

    #[test]
    fn metrics_reflect_equity_curve() {
        let engine = RiskEngine::default();
        let ledger = cash_ledger();
        for eq in ["100000", "120000", "90000", "130000"] {
            engine.record_equity(d(eq));
        }
        let metrics = engine.metrics(&ledger);
        assert!((metrics.max_drawdown - 0.25).abs() < 1e-12);
        assert!(metrics.volatility > 0.0);
    }
}
