//! Caller-facing updates delivered on subscription handles.

use std::sync::Arc;

use crate::market::SummaryBoard;
use crate::orderbook::types::OrderBookState;
use crate::protocol::messages::{
    BalanceDelta, ExchangeDelta, OrderDelta, SummaryDeltas, SummaryLiteDeltas,
};
use crate::stream::channel::Channel;

/// What an update carries.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdatePayload {
    /// Full book after the change, plus the delta that produced it.
    ///
    /// `delta` is `None` when the book comes straight from a snapshot.
    OrderBook {
        /// Book after the change.
        book: Arc<OrderBookState>,
        /// Delta just merged.
        delta: Option<Arc<ExchangeDelta>>,
    },
    /// Full summary board after the change, plus the changed markets.
    Summaries {
        /// Board after the change.
        board: Arc<SummaryBoard>,
        /// Summaries just merged.
        changed: Option<Arc<SummaryDeltas>>,
    },
    /// Light summaries, passed through as received.
    SummaryLite(Arc<SummaryLiteDeltas>),
    /// Account balance change.
    Balance(Arc<BalanceDelta>),
    /// Account order change.
    Order(Arc<OrderDelta>),
    /// Local state was discarded; wait for the next `resync` update or
    /// refetch through the client.
    ResyncRequired,
}

/// One update on a subscribed channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// Channel the update belongs to.
    pub channel: Channel,
    /// Nonce after the update, for sequenced channels.
    pub nonce: Option<u64>,
    /// Update contents.
    pub payload: UpdatePayload,
    /// Set on the first full state after a snapshot.
    pub resync: bool,
}

impl Update {
    /// Marker telling the consumer that intermediate updates were lost.
    pub fn resync_required(channel: Channel) -> Self {
        Self {
            channel,
            nonce: None,
            payload: UpdatePayload::ResyncRequired,
            resync: false,
        }
    }

    /// Check if this is the [`UpdatePayload::ResyncRequired`] marker.
    pub fn is_resync_marker(&self) -> bool {
        matches!(self.payload, UpdatePayload::ResyncRequired)
    }

    /// The order book carried by this update, if any.
    pub fn order_book(&self) -> Option<&Arc<OrderBookState>> {
        match &self.payload {
            UpdatePayload::OrderBook { book, .. } => Some(book),
            _ => None,
        }
    }

    /// The summary board carried by this update, if any.
    pub fn summaries(&self) -> Option<&Arc<SummaryBoard>> {
        match &self.payload {
            UpdatePayload::Summaries { board, .. } => Some(board),
            _ => None,
        }
    }
}
