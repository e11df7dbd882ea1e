//! Core types - Strong typing for safety

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Millisecond UTC timestamp.
pub type Timestamp = i64;

pub fn now_millis() -> Timestamp {
    Utc::now().timestamp_millis()
}

/// Tradeable symbol (e.g., "AAPL", "BTC/USD")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

/// Instrument definition. Tick size bounds price granularity, lot size
/// bounds quantity granularity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub symbol: Symbol,
    pub name: String,
    pub tick_size: Decimal,
    pub lot_size: Decimal,
}

impl Asset {
    pub fn new(symbol: impl Into<Symbol>, name: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            tick_size: Decimal::new(1, 2), // 0.01
            lot_size: Decimal::ONE,
        }
    }

    pub fn with_tick_size(mut self, tick: Decimal) -> Self {
        self.tick_size = tick;
        self
    }

    pub fn with_lot_size(mut self, lot: Decimal) -> Self {
        self.lot_size = lot;
        self
    }

    /// Decimal places implied by the tick size (0.01 → 2).
    pub fn price_dp(&self) -> u32 {
        self.tick_size.normalize().scale()
    }
}

impl From<&str> for Asset {
    fn from(s: &str) -> Self {
        Asset::new(s, s)
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    /// Valid until session end
    Day,
    /// Good till cancelled
    Gtc,
    /// Immediate or cancel: unfilled remainder is cancelled
    Ioc,
    /// Fill or kill: rejected unless fully fillable immediately
    Fok,
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Partial,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }
}

/// Monotonically increasing order identifier, assigned at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ORD-{:06}", self.0)
    }
}

/// Incoming order request, before an id is assigned.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<Symbol>, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
        }
    }

    pub fn limit(symbol: impl Into<Symbol>, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            limit_price: Some(price),
            stop_price: None,
            time_in_force: TimeInForce::Gtc,
        }
    }

    pub fn stop(symbol: impl Into<Symbol>, side: Side, quantity: Decimal, trigger: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Stop,
            quantity,
            limit_price: None,
            stop_price: Some(trigger),
            time_in_force: TimeInForce::Gtc,
        }
    }

    pub fn with_tif(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }
}

/// Order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub average_fill_price: Option<Decimal>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Order {
    pub fn from_request(id: OrderId, req: &OrderRequest) -> Self {
        let now = now_millis();
        Self {
            id,
            symbol: req.symbol.clone(),
            side: req.side,
            order_type: req.order_type,
            quantity: req.quantity,
            limit_price: req.limit_price,
            stop_price: req.stop_price,
            time_in_force: req.time_in_force,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            average_fill_price: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn remaining(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Trade execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    pub timestamp: Timestamp,
}

impl Trade {
    pub fn new(
        order_id: OrderId,
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        commission: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            symbol,
            side,
            quantity,
            price,
            commission,
            timestamp: now_millis(),
        }
    }

    /// Signed quantity: positive for buys, negative for sells.
    pub fn signed_quantity(&self) -> Decimal {
        match self.side {
            Side::Buy => self.quantity,
            Side::Sell => -self.quantity,
        }
    }

    pub fn notional(&self) -> Decimal {
        self.quantity * self.price
    }
}

/// Position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub last_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub updated_at: Timestamp,
}

impl Position {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            quantity: Decimal::ZERO,
            average_price: Decimal::ZERO,
            last_price: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            updated_at: now_millis(),
        }
    }

    pub fn market_value(&self) -> Decimal {
        self.quantity * self.last_price
    }

    pub fn total_pnl(&self) -> Decimal {
        self.unrealized_pnl + self.realized_pnl
    }
}

/// Account information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub cash: Decimal,
    pub equity: Decimal,
    pub buying_power: Decimal,
    pub margin_used: Decimal,
    pub margin_available: Decimal,
    pub updated_at: Timestamp,
}

impl Account {
    pub fn new(cash: Decimal) -> Self {
        Self {
            cash,
            equity: cash,
            buying_power: cash,
            margin_used: Decimal::ZERO,
            margin_available: Decimal::ZERO,
            updated_at: now_millis(),
        }
    }
}

/// Market data tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketTick {
    pub symbol: Symbol,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
    pub volume: Decimal,
    pub timestamp: Timestamp,
}

impl MarketTick {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::from(2)
    }

    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }

    /// Price a taker pays on the given side: ask for buys, bid for sells.
    /// Falls back to `last` when the quote side is empty.
    pub fn taker_price(&self, side: Side) -> Decimal {
        let quoted = match side {
            Side::Buy => self.ask,
            Side::Sell => self.bid,
        };
        if quoted.is_zero() { self.last } else { quoted }
    }
}

/// Aggregated order book level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Outcome of an execution attempt, published on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub message: String,
    pub trades: Vec<Trade>,
    pub order: Order,
}

impl ExecutionResult {
    pub fn filled(order: Order, trades: Vec<Trade>) -> Self {
        Self {
            success: true,
            message: format!("{} executed", order.id),
            trades,
            order,
        }
    }

    pub fn rejected(order: Order, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            trades: Vec::new(),
            order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn symbol_is_uppercased() {
        assert_eq!(Symbol::new("aapl").as_str(), "AAPL");
    }

    #[test]
    fn tick_size_implies_price_dp() {
        let asset = Asset::new("AAPL", "Apple Inc.");
        assert_eq!(asset.price_dp(), 2);
        let coarse = Asset::new("ES", "E-mini").with_tick_size(d("0.25"));
        assert_eq!(coarse.price_dp(), 2);
        let whole = Asset::new("KRW", "Korean Won pair").with_tick_size(d("1"));
        assert_eq!(whole.price_dp(), 0);
    }

    #[test]
    fn taker_price_uses_quote_side() {
        let tick = MarketTick {
            symbol: "AAPL".into(),
            bid: d("149.99"),
            ask: d("150.01"),
            last: d("150.00"),
            volume: Decimal::ZERO,
            timestamp: 0,
        };
        assert_eq!(tick.taker_price(Side::Buy), d("150.01"));
        assert_eq!(tick.taker_price(Side::Sell), d("149.99"));

        let no_quote = MarketTick {
            bid: Decimal::ZERO,
            ask: Decimal::ZERO,
            ..tick
        };
        assert_eq!(no_quote.taker_price(Side::Buy), d("150.00"));
    }

    // The persisted field set must round-trip losslessly: decimal values
    // as exact strings, status as one of the enumerated names.
    #[test]
    fn order_round_trips_through_json() {
        let order = Order {
            id: OrderId(42),
            symbol: "AAPL".into(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            quantity: d("100"),
            limit_price: Some(d("153.33")),
            stop_price: None,
            time_in_force: TimeInForce::Gtc,
            status: OrderStatus::Partial,
            filled_quantity: d("40.5"),
            average_fill_price: Some(d("153.30")),
            created_at: 1_700_000_000_000,
            updated_at: 1_700_000_000_500,
        };
        let json = serde_json::to_string(&order).unwrap();
        assert!(json.contains("\"partial\""));
        let back: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(back.quantity, order.quantity);
        assert_eq!(back.filled_quantity, d("40.5"));
        assert_eq!(back.average_fill_price, Some(d("153.30")));
        assert_eq!(back.status, OrderStatus::Partial);
    }

    #[test]
    fn position_round_trips_through_json() {
        let pos = Position {
            symbol: "AAPL".into(),
            quantity: d("150"),
            average_price: d("153.33"),
            last_price: d("160"),
            unrealized_pnl: d("1000.50"),
            realized_pnl: d("333.50"),
            updated_at: 0,
        };
        let back: Position = serde_json::from_str(&serde_json::to_string(&pos).unwrap()).unwrap();
        assert_eq!(back.quantity, pos.quantity);
        assert_eq!(back.average_price, pos.average_price);
        assert_eq!(back.unrealized_pnl, d("1000.50"));
        assert_eq!(back.realized_pnl, d("333.50"));
    }

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Partial.is_terminal());
    }
}
