//! Typed event channels - the subscriber interface for engine callbacks.
//!
//! One channel family per event kind. `subscribe_*` hands back an
//! independent receiver; publishing clones the event to every live
//! subscriber and silently drops the ones that went away.

use parking_lot::Mutex;

use crate::risk::RiskViolation;
use crate::types::{ExecutionResult, Order, Trade};

struct Channel<T> {
    senders: Mutex<Vec<flume::Sender<T>>>,
}

impl<T: Clone> Channel<T> {
    fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    fn subscribe(&self) -> flume::Receiver<T> {
        let (tx, rx) = flume::unbounded();
        self.senders.lock().push(tx);
        rx
    }

    fn publish(&self, event: &T) {
        self.senders
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Engine event bus.
pub struct EventBus {
    orders: Channel<Order>,
    trades: Channel<Trade>,
    executions: Channel<ExecutionResult>,
    violations: Channel<RiskViolation>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            orders: Channel::new(),
            trades: Channel::new(),
            executions: Channel::new(),
            violations: Channel::new(),
        }
    }

    pub fn subscribe_orders(&self) -> flume::Receiver<Order> {
        self.orders.subscribe()
    }

    pub fn subscribe_trades(&self) -> flume::Receiver<Trade> {
        self.trades.subscribe()
    }

    pub fn subscribe_executions(&self) -> flume::Receiver<ExecutionResult> {
        self.executions.subscribe()
    }

    pub fn subscribe_violations(&self) -> flume::Receiver<RiskViolation> {
        self.violations.subscribe()
    }

    pub fn publish_order(&self, order: &Order) {
        self.orders.publish(order);
    }

    pub fn publish_trade(&self, trade: &Trade) {
        self.trades.publish(trade);
    }

    pub fn publish_execution(&self, result: &ExecutionResult) {
        self.executions.publish(result);
    }

    pub fn publish_violation(&self, violation: &RiskViolation) {
        self.violations.publish(violation);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderId, OrderRequest, Side};
    use rust_decimal::Decimal;

    #[test]
    fn each_subscriber_sees_every_event() {
        let bus = EventBus::new();
        let rx1 = bus.subscribe_orders();
        let rx2 = bus.subscribe_orders();

        let order = Order::from_request(
            OrderId(1),
            &OrderRequest::market("AAPL", Side::Buy, Decimal::from(10)),
        );
        bus.publish_order(&order);

        assert_eq!(rx1.try_recv().unwrap().id, OrderId(1));
        assert_eq!(rx2.try_recv().unwrap().id, OrderId(1));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe_trades();
        drop(rx);

        let trade = Trade::new(
            OrderId(1),
            "AAPL".into(),
            Side::Buy,
            Decimal::ONE,
            Decimal::from(100),
            Decimal::ZERO,
        );
        // Publishing into a dead channel must not error or leak.
        bus.publish_trade(&trade);
        let rx2 = bus.subscribe_trades();
        bus.publish_trade(&trade);
        assert_eq!(rx2.try_recv().unwrap().order_id, OrderId(1));
    }
}
