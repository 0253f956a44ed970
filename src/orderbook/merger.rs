//! Applies level operations to a maintained order book.
//!
//! Both sides are kept as sorted vectors; every operation locates its rate by
//! binary search against the side's ordering, so a batch of `k` operations on
//! a book of `n` levels costs `O(k log n)` comparisons plus element shifts.

use rust_decimal::Decimal;
use time::OffsetDateTime;
use tracing::trace;

use super::types::{LevelOp, LevelOperation, OrderBookLevel, OrderBookState, Side};
use crate::protocol::messages::{ExchangeDelta, ExchangeState};
use crate::stream::sequenced::Sequenced;

/// Merges incremental deltas into an [`OrderBookState`].
pub struct DeltaMerger;

impl DeltaMerger {
    /// Apply every operation of an exchange delta, in order.
    pub fn apply(book: &mut OrderBookState, delta: &ExchangeDelta) {
        for operation in delta.operations() {
            Self::apply_op(book, operation);
        }

        debug_assert!(
            book.is_well_formed(),
            "order book {} violated ordering after nonce {}",
            book.market,
            delta.nonce
        );
    }

    /// Apply a single operation.
    ///
    /// Add and Update with a non-positive quantity act as Remove. An Update
    /// for a rate that is not on the book inserts it.
    pub fn apply_op(book: &mut OrderBookState, operation: LevelOperation) {
        let LevelOperation {
            side,
            op,
            rate,
            quantity,
        } = operation;
        let levels = book.levels_mut(side);
        let position = Self::position(levels, side, rate);

        let remove = op == LevelOp::Remove || quantity <= Decimal::ZERO;
        match (position, remove) {
            (Ok(index), true) => {
                levels.remove(index);
            }
            (Err(_), true) => {
                trace!(%side, %rate, "remove for absent level ignored");
            }
            (Ok(index), false) => {
                levels[index].quantity = quantity;
            }
            (Err(index), false) => {
                levels.insert(index, OrderBookLevel::new(rate, quantity));
            }
        }
    }

    fn position(levels: &[OrderBookLevel], side: Side, rate: Decimal) -> Result<usize, usize> {
        levels.binary_search_by(|level| side.cmp_rates(level.rate, rate))
    }
}

impl OrderBookState {
    /// Build a book from a `QueryExchangeState` snapshot.
    ///
    /// Levels are inserted through the merger, so unsorted, duplicated or
    /// empty levels in the snapshot still produce a well-formed book.
    pub fn from_exchange_state(market: impl Into<String>, state: &ExchangeState) -> Self {
        let mut book = OrderBookState::empty(market, state.nonce);
        let buys = state.buys.iter().map(|l| (Side::Buy, l));
        let sells = state.sells.iter().map(|l| (Side::Sell, l));

        for (side, level) in buys.chain(sells) {
            DeltaMerger::apply_op(
                &mut book,
                LevelOperation {
                    side,
                    op: LevelOp::Add,
                    rate: level.rate,
                    quantity: level.quantity,
                },
            );
        }

        book
    }
}

impl Sequenced for OrderBookState {
    type Delta = ExchangeDelta;

    fn nonce(&self) -> u64 {
        self.nonce
    }

    fn merge(&mut self, nonce: u64, delta: &ExchangeDelta) {
        DeltaMerger::apply(self, delta);
        self.nonce = nonce;
        self.updated_at = OffsetDateTime::now_utc();
    }
}
