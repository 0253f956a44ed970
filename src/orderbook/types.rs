//! Order book types and data structures.

use std::cmp::Ordering;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;

/// Book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Side {
    /// Bids, sorted by rate descending.
    Buy,
    /// Asks, sorted by rate ascending.
    Sell,
}

impl Side {
    /// Ordering of `level_rate` relative to `target` in this side's sort order.
    pub fn cmp_rates(self, level_rate: Decimal, target: Decimal) -> Ordering {
        match self {
            Side::Buy => target.cmp(&level_rate),
            Side::Sell => level_rate.cmp(&target),
        }
    }
}

/// Level operation carried by an exchange delta (`TY` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum LevelOp {
    /// Insert a level, overwriting an existing one at the same rate.
    Add,
    /// Delete the level at this rate.
    Remove,
    /// Replace the quantity at this rate.
    Update,
}

impl TryFrom<u8> for LevelOp {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LevelOp::Add),
            1 => Ok(LevelOp::Remove),
            2 => Ok(LevelOp::Update),
            other => Err(format!("unknown level operation type {}", other)),
        }
    }
}

impl From<LevelOp> for u8 {
    fn from(op: LevelOp) -> Self {
        match op {
            LevelOp::Add => 0,
            LevelOp::Remove => 1,
            LevelOp::Update => 2,
        }
    }
}

/// Single price level in an order book.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderBookLevel {
    /// Price at this level.
    pub rate: Decimal,
    /// Total quantity resting at this price.
    pub quantity: Decimal,
}

impl OrderBookLevel {
    /// Create a new price level.
    pub fn new(rate: Decimal, quantity: Decimal) -> Self {
        Self { rate, quantity }
    }
}

/// One operation against one side of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelOperation {
    /// Side the operation targets.
    pub side: Side,
    /// What to do at the rate.
    pub op: LevelOp,
    /// Price level.
    pub rate: Decimal,
    /// New quantity (ignored for removes).
    pub quantity: Decimal,
}

/// Order book for one market, maintained from a snapshot plus deltas.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBookState {
    /// Market symbol, e.g. `BTC-ETH`.
    pub market: String,
    /// Nonce of the last applied snapshot or delta.
    pub nonce: u64,
    /// Bid levels sorted by rate descending.
    pub buys: Vec<OrderBookLevel>,
    /// Ask levels sorted by rate ascending.
    pub sells: Vec<OrderBookLevel>,
    /// When this book was last updated.
    pub updated_at: OffsetDateTime,
}

impl OrderBookState {
    /// Create an empty book at the given nonce.
    pub fn empty(market: impl Into<String>, nonce: u64) -> Self {
        Self {
            market: market.into(),
            nonce,
            buys: Vec::new(),
            sells: Vec::new(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    /// Levels for one side.
    pub fn levels(&self, side: Side) -> &[OrderBookLevel] {
        match side {
            Side::Buy => &self.buys,
            Side::Sell => &self.sells,
        }
    }

    /// Mutable levels for one side.
    pub fn levels_mut(&mut self, side: Side) -> &mut Vec<OrderBookLevel> {
        match side {
            Side::Buy => &mut self.buys,
            Side::Sell => &mut self.sells,
        }
    }

    /// Get the best bid rate.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.buys.first().map(|l| l.rate)
    }

    /// Get the best ask rate.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.sells.first().map(|l| l.rate)
    }

    /// Get the spread between best bid and ask.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Get the midpoint between best bid and ask.
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// Check if the book is crossed (best_ask <= best_bid).
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => ask <= bid,
            _ => false,
        }
    }

    /// Total quantity on one side.
    pub fn depth(&self, side: Side) -> Decimal {
        self.levels(side).iter().map(|l| l.quantity).sum()
    }

    /// Sort order strict per side, rates unique, quantities positive.
    pub fn is_well_formed(&self) -> bool {
        [Side::Buy, Side::Sell].into_iter().all(|side| {
            let levels = self.levels(side);
            levels.iter().all(|l| l.quantity > Decimal::ZERO)
                && levels
                    .windows(2)
                    .all(|pair| side.cmp_rates(pair[0].rate, pair[1].rate) == Ordering::Less)
        })
    }
}
