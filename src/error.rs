//! Error handling - Rejections are values, never panics
//!
//! Every domain-level rejection crosses the module boundary as a variant
//! carrying a machine-checkable reason and a human-readable message.
//! `Internal` is reserved for invariant corruption and is logged at error
//! level before being propagated.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::risk::ViolationKind;
use crate::types::{OrderId, OrderStatus, Symbol};

pub type Result<T> = std::result::Result<T, Error>;

/// PaperDesk error hierarchy
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed order: empty symbol, non-positive quantity, missing price
    #[error("Validation: {0}")]
    Validation(String),

    /// Symbol not present in the asset registry
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(Symbol),

    /// Buy notional exceeds available buying power
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    /// Sell quantity exceeds held quantity
    #[error("Insufficient shares: held {held}, requested {requested}")]
    InsufficientShares { held: Decimal, requested: Decimal },

    /// Pre-trade risk breach
    #[error("Risk rejected ({kind:?}): {message}")]
    RiskRejected { kind: ViolationKind, message: String },

    /// No market tick available for the symbol
    #[error("Market unavailable for {0}")]
    MarketUnavailable(Symbol),

    /// Unknown order or position on query, cancel, or modify
    #[error("Not found: {0}")]
    NotFound(OrderId),

    /// Cancel/modify against an order already in a terminal state
    #[error("State conflict: {id} is already {status:?}")]
    StateConflict { id: OrderId, status: OrderStatus },

    /// Generic order rejection (e.g. unfillable fill-or-kill)
    #[error("Order rejected: {0}")]
    Rejected(String),

    /// Configuration errors
    #[error("Config: {0}")]
    Config(String),

    /// Invariant corruption - a bug, not a user error
    #[error("Internal: {0}")]
    Internal(String),
}
