//! Order Manager - orchestrates the order lifecycle
//!
//! Submission flows validate → pre-trade risk → execute. Market orders
//! fill against the latest tick quote (single-participant paper model,
//! no opposing book); limit orders fill immediately when they cross the
//! quote, otherwise rest in the symbol's book until a tick makes them
//! marketable. All ledger mutations funnel through one lock; each book
//! has its own, and no operation ever holds two symbols' books.

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

use crate::book::{FillPlan, OrderBook};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::ledger::Ledger;
use crate::risk::{RiskEngine, RiskLimits, RiskMetrics, RiskViolation};
use crate::types::{
    Asset, ExecutionResult, MarketTick, Order, OrderId, OrderRequest, OrderStatus, OrderType,
    PriceLevel, Position, Side, Symbol, TimeInForce, Trade, now_millis,
};

pub struct OrderManager {
    assets: RwLock<HashMap<Symbol, Asset>>,
    books: RwLock<HashMap<Symbol, Arc<Mutex<OrderBook>>>>,
    ticks: RwLock<HashMap<Symbol, MarketTick>>,
    orders: RwLock<HashMap<OrderId, Order>>,
    order_trades: RwLock<HashMap<OrderId, Vec<Trade>>>,
    ledger: Mutex<Ledger>,
    risk: RiskEngine,
    bus: EventBus,
    next_order_id: AtomicU64,
    commission_rate: Decimal,
}

impl OrderManager {
    pub fn new(config: &AppConfig) -> Self {
        let limits = config.risk.to_limits();
        let ledger = Ledger::new(config.initial_cash(), limits.max_leverage);
        Self {
            assets: RwLock::new(HashMap::new()),
            books: RwLock::new(HashMap::new()),
            ticks: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            order_trades: RwLock::new(HashMap::new()),
            ledger: Mutex::new(ledger),
            risk: RiskEngine::new(limits),
            bus: EventBus::new(),
            next_order_id: AtomicU64::new(0),
            commission_rate: config.commission_rate(),
        }
    }

    /// Make a symbol tradeable. Each symbol gets its own book and lock.
    pub fn register_asset(&self, asset: Asset) {
        let symbol = asset.symbol.clone();
        self.books
            .write()
            .entry(symbol.clone())
            .or_insert_with(|| Arc::new(Mutex::new(OrderBook::new(symbol.clone()))));
        self.assets.write().insert(symbol, asset);
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.assets.read().keys().cloned().collect()
    }

    pub fn set_risk_limits(&self, limits: RiskLimits) {
        self.ledger.lock().set_leverage_limit(limits.max_leverage);
        self.risk.set_limits(limits);
    }

    pub fn risk_limits(&self) -> RiskLimits {
        self.risk.limits()
    }

    // ---- event subscriptions -------------------------------------------

    pub fn subscribe_orders(&self) -> flume::Receiver<Order> {
        self.bus.subscribe_orders()
    }

    pub fn subscribe_trades(&self) -> flume::Receiver<Trade> {
        self.bus.subscribe_trades()
    }

    pub fn subscribe_executions(&self) -> flume::Receiver<ExecutionResult> {
        self.bus.subscribe_executions()
    }

    pub fn subscribe_violations(&self) -> flume::Receiver<RiskViolation> {
        self.bus.subscribe_violations()
    }

    // ---- order entry ---------------------------------------------------

    /// Submit an order. Returns the assigned id on acceptance; rejections
    /// come back as error values with the order stored in Rejected state
    /// and an execution event published.
    pub fn submit(&self, request: OrderRequest) -> Result<OrderId> {
        let id = OrderId(self.next_order_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut order = Order::from_request(id, &request);

        let asset = match self.validate(&request) {
            Ok(asset) => asset,
            Err(e) => return Err(self.reject(order, e)),
        };

        let tick = self.ticks.read().get(&order.symbol).cloned();

        // Reference price for risk: the quote a market order would pay,
        // the limit/stop price otherwise.
        let ref_price = match order.order_type {
            OrderType::Market => match &tick {
                Some(t) if t.taker_price(order.side) > Decimal::ZERO => {
                    t.taker_price(order.side)
                }
                _ => {
                    return Err(self.reject(order, Error::MarketUnavailable(request.symbol)));
                }
            },
            OrderType::Limit => order.limit_price.expect("validated"),
            OrderType::Stop => order.stop_price.expect("validated"),
        };

        {
            let ledger = self.ledger.lock();
            if let Err(e) = self.risk.check_order(&order, ref_price, &ledger) {
                drop(ledger);
                return Err(self.reject(order, e));
            }
        }

        info!(%id, symbol = %order.symbol, side = %order.side, quantity = %order.quantity, "order accepted");

        match order.order_type {
            OrderType::Market => {
                let price = tick.expect("checked above").taker_price(order.side);
                let quantity = order.remaining();
                self.execute_immediate(&mut order, quantity, price, &asset)?;
            }
            OrderType::Limit => {
                let limit = order.limit_price.expect("validated");
                let quote = tick.as_ref().map(|t| t.taker_price(order.side));
                let crossing = quote.is_some_and(|q| {
                    q > Decimal::ZERO
                        && match order.side {
                            Side::Buy => limit >= q,
                            Side::Sell => limit <= q,
                        }
                });
                if crossing {
                    // Fill at the quote: crossing guarantees it is capped
                    // by the limit.
                    let price = quote.expect("crossing implies a quote");
                    let quantity = order.remaining();
                    self.execute_immediate(&mut order, quantity, price, &asset)?;
                } else {
                    match order.time_in_force {
                        TimeInForce::Ioc => {
                            order.status = OrderStatus::Cancelled;
                            order.updated_at = now_millis();
                            self.store(order.clone());
                            self.bus.publish_order(&order);
                            self.bus.publish_execution(&ExecutionResult::rejected(
                                order,
                                "immediate-or-cancel expired unfilled",
                            ));
                        }
                        TimeInForce::Fok => {
                            return Err(self.reject(
                                order,
                                Error::Rejected(
                                    "fill-or-kill not immediately fillable".into(),
                                ),
                            ));
                        }
                        TimeInForce::Day | TimeInForce::Gtc => {
                            self.rest_in_book(&mut order);
                        }
                    }
                }
            }
            OrderType::Stop => {
                // Held untriggered; converts to market when a tick touches
                // the stop price.
                self.store(order.clone());
                self.bus.publish_order(&order);
            }
        }

        Ok(id)
    }

    /// Cancel a resting order. Unknown ids and terminal orders resolve to
    /// definitive errors, never a silent no-op: a cancel racing a fill
    /// comes back as `StateConflict` with the terminal status named.
    pub fn cancel(&self, id: OrderId) -> Result<()> {
        let mut orders = self.orders.write();
        let order = orders.get_mut(&id).ok_or(Error::NotFound(id))?;
        if order.is_terminal() {
            return Err(Error::StateConflict {
                id,
                status: order.status,
            });
        }
        if order.order_type == OrderType::Limit {
            if let Some(book) = self.books.read().get(&order.symbol).cloned() {
                book.lock().remove(id);
            }
        }
        order.status = OrderStatus::Cancelled;
        order.updated_at = now_millis();
        let snapshot = order.clone();
        drop(orders);

        info!(%id, "order cancelled");
        self.bus.publish_order(&snapshot);
        Ok(())
    }

    /// Modify is cancel-and-resubmit under a fresh id; the replacement
    /// goes to the back of its price level. Not atomic: if the
    /// resubmission is rejected, the original stays cancelled.
    pub fn modify(
        &self,
        id: OrderId,
        new_quantity: Option<Decimal>,
        new_limit_price: Option<Decimal>,
    ) -> Result<OrderId> {
        let original = self.order(id).ok_or(Error::NotFound(id))?;
        self.cancel(id)?;

        let mut request = OrderRequest {
            symbol: original.symbol.clone(),
            side: original.side,
            order_type: original.order_type,
            quantity: new_quantity.unwrap_or_else(|| original.remaining()),
            limit_price: original.limit_price,
            stop_price: original.stop_price,
            time_in_force: original.time_in_force,
        };
        if let Some(price) = new_limit_price {
            request.limit_price = Some(price);
        }
        self.submit(request)
    }

    /// Cancel every non-terminal order.
    pub fn cancel_all(&self) {
        let ids: Vec<OrderId> = self
            .orders
            .read()
            .values()
            .filter(|o| !o.is_terminal())
            .map(|o| o.id)
            .collect();
        for id in ids {
            let _ = self.cancel(id);
        }
    }

    /// Session-end sweep: Day-TIF orders still working are expired.
    pub fn expire_day_orders(&self) {
        let ids: Vec<OrderId> = self
            .orders
            .read()
            .values()
            .filter(|o| !o.is_terminal() && o.time_in_force == TimeInForce::Day)
            .map(|o| o.id)
            .collect();
        for id in ids {
            let mut orders = self.orders.write();
            let Some(order) = orders.get_mut(&id) else {
                continue;
            };
            if order.is_terminal() {
                continue;
            }
            if order.order_type == OrderType::Limit {
                if let Some(book) = self.books.read().get(&order.symbol).cloned() {
                    book.lock().remove(id);
                }
            }
            order.status = OrderStatus::Expired;
            order.updated_at = now_millis();
            let snapshot = order.clone();
            drop(orders);
            info!(%id, "day order expired");
            self.bus.publish_order(&snapshot);
        }
    }

    /// Restart day tracking (daily PnL baseline) from current equity.
    pub fn reset_daily(&self) {
        self.ledger.lock().reset_daily();
    }

    // ---- market data ---------------------------------------------------

    /// Ingest a tick: mark to market, trigger stops, fill resting orders
    /// that became marketable, then run the advisory portfolio check.
    pub fn process_tick(&self, tick: MarketTick) {
        let symbol = tick.symbol.clone();
        if !self.assets.read().contains_key(&symbol) {
            warn!(%symbol, "tick for unregistered symbol dropped");
            return;
        }
        self.ticks.write().insert(symbol.clone(), tick.clone());

        {
            let mut ledger = self.ledger.lock();
            ledger.mark_to_market(&symbol, tick.last);
            self.risk.record_equity(ledger.equity());
        }

        self.trigger_stops(&tick);
        self.fill_marketable(&tick);

        let violations = {
            let ledger = self.ledger.lock();
            self.risk.check_portfolio(&ledger)
        };
        for violation in violations {
            warn!(kind = ?violation.kind, message = %violation.message, "risk violation");
            self.bus.publish_violation(&violation);
        }
    }

    pub fn latest_tick(&self, symbol: &Symbol) -> Option<MarketTick> {
        self.ticks.read().get(symbol).cloned()
    }

    // ---- queries -------------------------------------------------------

    pub fn order(&self, id: OrderId) -> Option<Order> {
        self.orders.read().get(&id).cloned()
    }

    pub fn active_orders(&self) -> Vec<Order> {
        self.orders
            .read()
            .values()
            .filter(|o| !o.is_terminal())
            .cloned()
            .collect()
    }

    pub fn active_order_count(&self) -> usize {
        self.orders.read().values().filter(|o| !o.is_terminal()).count()
    }

    pub fn orders_by_symbol(&self, symbol: &Symbol) -> Vec<Order> {
        self.orders
            .read()
            .values()
            .filter(|o| &o.symbol == symbol)
            .cloned()
            .collect()
    }

    pub fn trades_for(&self, id: OrderId) -> Vec<Trade> {
        self.order_trades.read().get(&id).cloned().unwrap_or_default()
    }

    /// Top-n aggregated levels: (bids, asks).
    pub fn book_levels(&self, symbol: &Symbol, n: usize) -> Option<(Vec<PriceLevel>, Vec<PriceLevel>)> {
        let book = self.books.read().get(symbol).cloned()?;
        let book = book.lock();
        Some(book.top_levels(n))
    }

    pub fn positions(&self) -> Vec<Position> {
        self.ledger.lock().positions()
    }

    pub fn position(&self, symbol: &Symbol) -> Option<Position> {
        self.ledger.lock().position(symbol).cloned()
    }

    pub fn account(&self) -> crate::types::Account {
        self.ledger.lock().account().clone()
    }

    pub fn risk_metrics(&self) -> RiskMetrics {
        let ledger = self.ledger.lock();
        self.risk.metrics(&ledger)
    }

    pub fn risk_violations(&self) -> Vec<RiskViolation> {
        self.risk.violations()
    }

    // ---- internals -----------------------------------------------------

    fn validate(&self, request: &OrderRequest) -> Result<Asset> {
        if request.symbol.as_str().is_empty() {
            return Err(Error::Validation("empty symbol".into()));
        }
        let asset = self
            .assets
            .read()
            .get(&request.symbol)
            .cloned()
            .ok_or_else(|| Error::UnknownSymbol(request.symbol.clone()))?;

        if request.quantity <= Decimal::ZERO {
            return Err(Error::Validation(format!(
                "quantity {} must be positive",
                request.quantity
            )));
        }
        if asset.lot_size > Decimal::ZERO && !(request.quantity % asset.lot_size).is_zero() {
            return Err(Error::Validation(format!(
                "quantity {} violates lot size {}",
                request.quantity, asset.lot_size
            )));
        }
        match request.order_type {
            OrderType::Limit => {
                let price = request
                    .limit_price
                    .ok_or_else(|| Error::Validation("limit order requires a limit price".into()))?;
                if price <= Decimal::ZERO {
                    return Err(Error::Validation("limit price must be positive".into()));
                }
                if asset.tick_size > Decimal::ZERO && !(price % asset.tick_size).is_zero() {
                    return Err(Error::Validation(format!(
                        "limit price {} violates tick size {}",
                        price, asset.tick_size
                    )));
                }
            }
            OrderType::Stop => {
                let price = request
                    .stop_price
                    .ok_or_else(|| Error::Validation("stop order requires a stop price".into()))?;
                if price <= Decimal::ZERO {
                    return Err(Error::Validation("stop price must be positive".into()));
                }
            }
            OrderType::Market => {}
        }
        Ok(asset)
    }

    /// Store a rejected order, publish the failure, and hand the error
    /// back to the caller. Nothing else has been mutated.
    fn reject(&self, mut order: Order, error: Error) -> Error {
        warn!(id = %order.id, %error, "order rejected");
        order.status = OrderStatus::Rejected;
        order.updated_at = now_millis();
        self.store(order.clone());
        self.bus.publish_order(&order);
        self.bus
            .publish_execution(&ExecutionResult::rejected(order, error.to_string()));
        error
    }

    fn store(&self, order: Order) {
        self.orders.write().insert(order.id, order);
    }

    fn price_dp(&self, symbol: &Symbol) -> u32 {
        self.assets
            .read()
            .get(symbol)
            .map(|a| a.price_dp())
            .unwrap_or(2)
    }

    /// Fill an order in full at the given price and run the advisory
    /// check. Used for market orders and immediately-crossing limits.
    fn execute_immediate(
        &self,
        order: &mut Order,
        quantity: Decimal,
        price: Decimal,
        asset: &Asset,
    ) -> Result<()> {
        let trade = {
            let mut ledger = self.ledger.lock();
            match self.apply_fill(order, quantity, price, asset.price_dp(), &mut ledger) {
                Ok(trade) => trade,
                Err(e) => {
                    drop(ledger);
                    return Err(self.reject(order.clone(), e));
                }
            }
        };
        self.store(order.clone());
        self.publish_fill(order, trade);
        self.run_advisory();
        Ok(())
    }

    /// Apply one fill to the ledger and the order. The ledger lock is held
    /// by the caller: fills for one account must land in event order.
    fn apply_fill(
        &self,
        order: &mut Order,
        quantity: Decimal,
        price: Decimal,
        price_dp: u32,
        ledger: &mut Ledger,
    ) -> Result<Trade> {
        let commission = (quantity * price * self.commission_rate).round_dp(2);
        match order.side {
            Side::Buy => ledger.apply_buy(&order.symbol, quantity, price, commission, price_dp),
            Side::Sell => ledger.apply_sell(&order.symbol, quantity, price, commission)?,
        }

        let trade = Trade::new(
            order.id,
            order.symbol.clone(),
            order.side,
            quantity,
            price,
            commission,
        );

        let filled_before = order.filled_quantity;
        let filled_now = filled_before + quantity;
        let avg_before = order.average_fill_price.unwrap_or(Decimal::ZERO);
        order.average_fill_price =
            Some((avg_before * filled_before + price * quantity) / filled_now);
        order.filled_quantity = filled_now;
        order.status = if filled_now >= order.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };
        order.updated_at = now_millis();

        self.order_trades
            .write()
            .entry(order.id)
            .or_default()
            .push(trade.clone());
        Ok(trade)
    }

    fn publish_fill(&self, order: &Order, trade: Trade) {
        info!(
            id = %order.id,
            side = %order.side,
            quantity = %trade.quantity,
            price = %trade.price,
            "fill"
        );
        self.bus.publish_trade(&trade);
        self.bus.publish_order(order);
        self.bus
            .publish_execution(&ExecutionResult::filled(order.clone(), vec![trade]));
    }

    fn run_advisory(&self) {
        let violations = {
            let ledger = self.ledger.lock();
            self.risk.check_portfolio(&ledger)
        };
        for violation in violations {
            warn!(kind = ?violation.kind, message = %violation.message, "risk violation");
            self.bus.publish_violation(&violation);
        }
    }

    /// Park a limit order in its symbol's book.
    fn rest_in_book(&self, order: &mut Order) {
        let book = self
            .books
            .read()
            .get(&order.symbol)
            .cloned()
            .expect("registered symbols always have a book");
        book.lock().add(order);
        self.store(order.clone());
        info!(id = %order.id, price = %order.limit_price.expect("limit"), "order resting");
        self.bus.publish_order(order);
    }

    /// Convert stop orders whose trigger the tick touched into market
    /// fills. The pre-trade check reruns at the trigger price: portfolio
    /// state may have moved since submission.
    fn trigger_stops(&self, tick: &MarketTick) {
        let triggered: Vec<OrderId> = self
            .orders
            .read()
            .values()
            .filter(|o| {
                o.order_type == OrderType::Stop
                    && !o.is_terminal()
                    && o.symbol == tick.symbol
                    && match o.side {
                        Side::Buy => tick.last >= o.stop_price.unwrap_or(Decimal::MAX),
                        Side::Sell => tick.last <= o.stop_price.unwrap_or(Decimal::MIN),
                    }
            })
            .map(|o| o.id)
            .collect();

        for id in triggered {
            let Some(mut order) = self.order(id) else {
                continue;
            };
            let price = tick.taker_price(order.side);
            if price <= Decimal::ZERO {
                continue;
            }
            info!(%id, %price, "stop triggered");

            let check = {
                let ledger = self.ledger.lock();
                self.risk.check_order(&order, price, &ledger)
            };
            if let Err(e) = check {
                self.reject(order, e);
                continue;
            }

            let dp = self.price_dp(&order.symbol);
            let quantity = order.remaining();
            let result = {
                let mut ledger = self.ledger.lock();
                self.apply_fill(&mut order, quantity, price, dp, &mut ledger)
            };
            match result {
                Ok(trade) => {
                    self.store(order.clone());
                    self.publish_fill(&order, trade);
                }
                Err(e) => {
                    self.reject(order, e);
                }
            }
        }
    }

    /// Fill resting limit orders the tick made marketable, in strict
    /// price-time order. The tick's printed volume is the per-side
    /// liquidity pool; zero volume means quote-driven unbounded fills.
    fn fill_marketable(&self, tick: &MarketTick) {
        let Some(book) = self.books.read().get(&tick.symbol).cloned() else {
            return;
        };
        let pool = (tick.volume > Decimal::ZERO).then_some(tick.volume);

        // Resting buys fill when their limit >= the new ask.
        let ask = if tick.ask > Decimal::ZERO { tick.ask } else { tick.last };
        if ask > Decimal::ZERO {
            let plans = book.lock().match_marketable(Side::Buy, ask, pool);
            self.apply_plans(&plans, ask);
        }

        // Resting sells fill when their limit <= the new bid.
        let bid = if tick.bid > Decimal::ZERO { tick.bid } else { tick.last };
        if bid > Decimal::ZERO {
            let plans = book.lock().match_marketable(Side::Sell, bid, pool);
            self.apply_plans(&plans, bid);
        }
    }

    fn apply_plans(&self, plans: &[FillPlan], price: Decimal) {
        for plan in plans {
            let Some(mut order) = self.order(plan.order_id) else {
                continue;
            };
            // A cancel that won the race leaves a terminal order; the
            // planned fill is abandoned.
            if order.is_terminal() {
                continue;
            }
            let dp = self.price_dp(&order.symbol);
            let result = {
                let mut ledger = self.ledger.lock();
                self.apply_fill(&mut order, plan.quantity, price, dp, &mut ledger)
            };
            match result {
                Ok(trade) => {
                    self.store(order.clone());
                    self.publish_fill(&order, trade);
                }
                Err(e) => {
                    // E.g. the position backing a resting sell is gone.
                    if let Some(book) = self.books.read().get(&order.symbol).cloned() {
                        book.lock().remove(order.id);
                    }
                    self.reject(order, e);
                }
            }
        }
    }
}
