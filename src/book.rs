//! In-memory limit order book for a single symbol.
//! Bids: descending (highest first). Asks: ascending (lowest first).
//! Entries within a price level keep strict FIFO arrival order.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, VecDeque};

use crate::types::{Order, OrderId, PriceLevel, Side, Symbol, Timestamp};

/// A resting order's footprint in the book.
#[derive(Debug, Clone, PartialEq)]
pub struct BookEntry {
    pub order_id: OrderId,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: Timestamp,
}

/// A fill planned by the matching scan: which resting order, how much.
/// The execution price is the tick quote the scan ran against.
#[derive(Debug, Clone, PartialEq)]
pub struct FillPlan {
    pub order_id: OrderId,
    pub quantity: Decimal,
}

pub struct OrderBook {
    pub symbol: Symbol,
    bids: BTreeMap<OrdDecimal, VecDeque<BookEntry>>, // price → FIFO queue
    asks: BTreeMap<OrdDecimal, VecDeque<BookEntry>>,
}

impl OrderBook {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<OrdDecimal, VecDeque<BookEntry>> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    fn side_ref(&self, side: Side) -> &BTreeMap<OrdDecimal, VecDeque<BookEntry>> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    /// Insert a resting order. Arrival at the back of its price level
    /// preserves price-time priority.
    pub fn add(&mut self, order: &Order) {
        let price = order
            .limit_price
            .expect("resting orders always carry a limit price");
        let entry = BookEntry {
            order_id: order.id,
            price,
            quantity: order.remaining(),
            timestamp: order.updated_at,
        };
        self.side_mut(order.side)
            .entry(OrdDecimal(price))
            .or_default()
            .push_back(entry);
    }

    /// Remove an order by id without disturbing the FIFO order of the
    /// remaining entries. Returns the excised entry if it was resting.
    pub fn remove(&mut self, order_id: OrderId) -> Option<BookEntry> {
        for side in [Side::Buy, Side::Sell] {
            let levels = self.side_mut(side);
            let mut hit: Option<(OrdDecimal, usize)> = None;
            for (price, queue) in levels.iter() {
                if let Some(pos) = queue.iter().position(|e| e.order_id == order_id) {
                    hit = Some((*price, pos));
                    break;
                }
            }
            if let Some((price, pos)) = hit {
                let queue = levels.get_mut(&price).expect("level exists");
                let entry = queue.remove(pos);
                if queue.is_empty() {
                    levels.remove(&price);
                }
                return entry;
            }
        }
        None
    }

    /// Shrink a resting entry in place after a partial fill. Time priority
    /// is kept. Returns false if the order is not resting.
    pub fn reduce(&mut self, order_id: OrderId, by: Decimal) -> bool {
        for side in [Side::Buy, Side::Sell] {
            for queue in self.side_mut(side).values_mut() {
                if let Some(entry) = queue.iter_mut().find(|e| e.order_id == order_id) {
                    entry.quantity -= by;
                    return true;
                }
            }
        }
        false
    }

    /// Re-price a resting order: cancel-then-reinsert. The order loses its
    /// time priority at the new level; this is the documented convention,
    /// not an oversight.
    pub fn update(&mut self, order: &Order) {
        self.remove(order.id);
        self.add(order);
    }

    /// Up to `n` aggregated price levels per side: (bids, asks).
    pub fn top_levels(&self, n: usize) -> (Vec<PriceLevel>, Vec<PriceLevel>) {
        let aggregate = |queue: &VecDeque<BookEntry>, price: Decimal| PriceLevel {
            price,
            quantity: queue.iter().map(|e| e.quantity).sum(),
        };
        let bids = self
            .bids
            .iter()
            .rev()
            .take(n)
            .map(|(p, q)| aggregate(q, p.0))
            .collect();
        let asks = self
            .asks
            .iter()
            .take(n)
            .map(|(p, q)| aggregate(q, p.0))
            .collect();
        (bids, asks)
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.iter().next_back().map(|(p, q)| PriceLevel {
            price: p.0,
            quantity: q.iter().map(|e| e.quantity).sum(),
        })
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.iter().next().map(|(p, q)| PriceLevel {
            price: p.0,
            quantity: q.iter().map(|e| e.quantity).sum(),
        })
    }

    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    pub fn len(&self) -> usize {
        self.bids.values().map(VecDeque::len).sum::<usize>()
            + self.asks.values().map(VecDeque::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    pub fn contains(&self, order_id: OrderId) -> bool {
        [Side::Buy, Side::Sell].into_iter().any(|side| {
            self.side_ref(side)
                .values()
                .any(|q| q.iter().any(|e| e.order_id == order_id))
        })
    }

    /// Match resting orders on `side` that are marketable against the tick
    /// quote, in strict price-time order: best price first, FIFO within a
    /// level. Buys are marketable when their limit >= the new ask
    /// (`threshold`), sells when their limit <= the new bid.
    ///
    /// `available` is the liquidity printed by the tick; `None` means
    /// quote-driven unbounded liquidity. Fully consumed entries are
    /// removed, a partially consumed head entry is reduced in place and
    /// keeps its priority.
    pub fn match_marketable(
        &mut self,
        side: Side,
        threshold: Decimal,
        mut available: Option<Decimal>,
    ) -> Vec<FillPlan> {
        let mut plans = Vec::new();
        loop {
            if available.is_some_and(|a| a <= Decimal::ZERO) {
                break;
            }
            let levels = self.side_mut(side);
            let best = match side {
                Side::Buy => levels.iter().next_back().map(|(p, _)| *p),
                Side::Sell => levels.iter().next().map(|(p, _)| *p),
            };
            let Some(price) = best else { break };
            let marketable = match side {
                Side::Buy => price.0 >= threshold,
                Side::Sell => price.0 <= threshold,
            };
            if !marketable {
                break;
            }

            let queue = levels.get_mut(&price).expect("level exists");
            while let Some(head) = queue.front_mut() {
                let take = match available {
                    Some(a) => head.quantity.min(a),
                    None => head.quantity,
                };
                if take.is_zero() {
                    break;
                }
                plans.push(FillPlan {
                    order_id: head.order_id,
                    quantity: take,
                });
                if let Some(a) = available.as_mut() {
                    *a -= take;
                }
                if take == head.quantity {
                    queue.pop_front();
                } else {
                    head.quantity -= take;
                    break;
                }
            }
            if queue.is_empty() {
                levels.remove(&price);
            } else if available.is_some_and(|a| a <= Decimal::ZERO) {
                break;
            }
        }
        plans
    }
}

/// Newtype wrapper so Decimal is Ord (required for BTreeMap keys).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrdDecimal(pub Decimal);

impl PartialOrd for OrdDecimal {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdDecimal {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}
