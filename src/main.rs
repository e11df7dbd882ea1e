use rand::RngExt;
use rust_decimal::Decimal;
use tracing_subscriber::{EnvFilter, fmt};

use paperdesk::engine::OrderManager;
use paperdesk::types::{Asset, MarketTick, OrderRequest, Side, now_millis};
use paperdesk::AppConfig;

fn main() -> anyhow::Result<()> {
    // 1. Initialize logger
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,paperdesk=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    tracing::info!("PaperDesk starting (paper trading session)...");

    // 2. Load session config and build the engine
    let config = AppConfig::load_default();
    let manager = OrderManager::new(&config);
    manager.register_asset(Asset::new("AAPL", "Apple Inc."));
    manager.register_asset(Asset::new("MSFT", "Microsoft Corp."));

    // 3. Drain engine events to the log
    let trades = manager.subscribe_trades();
    let violations = manager.subscribe_violations();

    // 4. Replay a synthetic random walk and trade into it
    let mut rng = rand::rng();
    let mut price = 150.0f64;

    manager.process_tick(synthetic_tick("AAPL", price));
    manager.submit(OrderRequest::market("AAPL", Side::Buy, Decimal::from(100)))?;
    manager.submit(OrderRequest::limit(
        "AAPL",
        Side::Sell,
        Decimal::from(50),
        Decimal::new(15500, 2), // take profit at 155.00
    ))?;

    for _ in 0..200 {
        price *= 1.0 + rng.random_range(-0.005..0.005);
        manager.process_tick(synthetic_tick("AAPL", price));
    }

    for trade in trades.drain() {
        tracing::info!(
            order = %trade.order_id,
            side = %trade.side,
            quantity = %trade.quantity,
            price = %trade.price,
            "trade"
        );
    }
    for violation in violations.drain() {
        tracing::warn!(kind = ?violation.kind, "{}", violation.message);
    }

    // 5. Session summary
    manager.expire_day_orders();
    let account = manager.account();
    let metrics = manager.risk_metrics();
    tracing::info!(
        cash = %account.cash,
        equity = %account.equity,
        total_pnl = %metrics.total_pnl,
        max_drawdown = metrics.max_drawdown,
        "session complete"
    );
    for position in manager.positions() {
        tracing::info!(
            symbol = %position.symbol,
            quantity = %position.quantity,
            average_price = %position.average_price,
            unrealized = %position.unrealized_pnl,
            realized = %position.realized_pnl,
            "open position"
        );
    }

    Ok(())
}

fn synthetic_tick(symbol: &str, mid: f64) -> MarketTick {
    let mid = Decimal::try_from(mid).unwrap_or(Decimal::ZERO).round_dp(2);
    let half_spread = Decimal::new(1, 2); // 0.01
    MarketTick {
        symbol: symbol.into(),
        bid: mid - half_spread,
        ask: mid + half_spread,
        last: mid,
        volume: Decimal::ZERO,
        timestamp: now_millis(),
    }
}
