//! Typed hub payloads, deserialized from key-expanded JSON.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum::Display;

use crate::market::MarketSummary;
use crate::orderbook::types::{LevelOp, LevelOperation, OrderBookLevel, Side};

/// Level change inside an exchange delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelUpdate {
    /// Operation to apply.
    #[serde(rename = "type")]
    pub op: LevelOp,
    /// Price level.
    pub rate: Decimal,
    /// New quantity.
    pub quantity: Decimal,
}

/// Trade printed alongside an exchange delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaFill {
    /// Fill id, when the hub sends it.
    #[serde(default)]
    pub fill_id: Option<u64>,
    /// `BUY` or `SELL`.
    pub order_type: String,
    /// Execution price.
    pub rate: Decimal,
    /// Executed quantity.
    pub quantity: Decimal,
    /// Epoch milliseconds.
    pub time_stamp: i64,
}

/// `uE`: incremental order book change for one market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeDelta {
    /// Market symbol.
    pub market_name: String,
    /// Sequence number.
    pub nonce: u64,
    /// Bid-side changes.
    #[serde(default)]
    pub buys: Vec<LevelUpdate>,
    /// Ask-side changes.
    #[serde(default)]
    pub sells: Vec<LevelUpdate>,
    /// Trades since the previous delta.
    #[serde(default)]
    pub fills: Vec<DeltaFill>,
}

impl ExchangeDelta {
    /// Flatten into book operations, bids first.
    pub fn operations(&self) -> SmallVec<[LevelOperation; 16]> {
        let buys = self.buys.iter().map(|u| (Side::Buy, u));
        let sells = self.sells.iter().map(|u| (Side::Sell, u));
        buys.chain(sells)
            .map(|(side, update)| LevelOperation {
                side,
                op: update.op,
                rate: update.rate,
                quantity: update.quantity,
            })
            .collect()
    }
}

/// Trade history entry in an exchange state snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFill {
    /// Fill id.
    pub id: u64,
    /// Epoch milliseconds.
    pub time_stamp: i64,
    /// Executed quantity.
    pub quantity: Decimal,
    /// Execution price.
    pub price: Decimal,
    /// Quantity × price.
    #[serde(default)]
    pub total: Option<Decimal>,
    /// `FILL` or `PARTIAL_FILL`.
    #[serde(default)]
    pub fill_type: Option<String>,
    /// `BUY` or `SELL`.
    pub order_type: String,
}

/// `QueryExchangeState` result: full book for one market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeState {
    /// Market symbol. The hub usually sends null here.
    #[serde(default)]
    pub market_name: Option<String>,
    /// Sequence number the book is current at.
    pub nonce: u64,
    /// Bids, best first.
    #[serde(default)]
    pub buys: Vec<OrderBookLevel>,
    /// Asks, best first.
    #[serde(default)]
    pub sells: Vec<OrderBookLevel>,
    /// Recent trades.
    #[serde(default)]
    pub fills: Vec<StateFill>,
}

/// `QuerySummaryState` result: every market's summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryState {
    /// Sequence number of the summary feed.
    pub nonce: u64,
    /// One entry per market.
    #[serde(default)]
    pub summaries: Vec<MarketSummary>,
}

/// `uS`: summaries that changed since the previous nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryDeltas {
    /// Sequence number.
    pub nonce: u64,
    /// Changed summaries.
    #[serde(default)]
    pub deltas: Vec<MarketSummary>,
}

/// Entry of a light summary delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiteSummary {
    /// Market symbol.
    pub market_name: String,
    /// Last trade price.
    pub last: Option<Decimal>,
    /// 24h volume in the base currency.
    pub base_volume: Option<Decimal>,
}

/// `uL`: unsequenced light summary deltas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryLiteDeltas {
    /// Changed markets.
    #[serde(default)]
    pub deltas: Vec<LiteSummary>,
}

/// Account balance for one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Balance record id.
    #[serde(default)]
    pub uuid: Option<String>,
    /// Owning account.
    #[serde(default)]
    pub account_id: Option<u64>,
    /// Currency code.
    pub currency: String,
    /// Total balance.
    pub balance: Decimal,
    /// Balance not locked in orders.
    pub available: Decimal,
    /// Pending deposits.
    #[serde(default)]
    pub pending: Option<Decimal>,
    /// Deposit address.
    #[serde(default)]
    pub crypto_address: Option<String>,
    /// Whether a deposit address was requested.
    #[serde(default)]
    pub requested: Option<bool>,
    /// Epoch milliseconds of the change.
    #[serde(default)]
    pub updated: Option<i64>,
    /// Auto-sell flag.
    #[serde(default)]
    pub auto_sell: Option<bool>,
}

/// `uB`: balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDelta {
    /// Account feed nonce.
    pub nonce: u64,
    /// New balance record.
    pub delta: Balance,
}

/// Kind of order change (`TY` on an order delta).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OrderDeltaType {
    /// New open order.
    Open,
    /// Partially filled.
    Partial,
    /// Completely filled.
    Fill,
    /// Cancelled.
    Cancel,
}

impl TryFrom<u8> for OrderDeltaType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(OrderDeltaType::Open),
            1 => Ok(OrderDeltaType::Partial),
            2 => Ok(OrderDeltaType::Fill),
            3 => Ok(OrderDeltaType::Cancel),
            other => Err(format!("unknown order delta type {}", other)),
        }
    }
}

impl From<OrderDeltaType> for u8 {
    fn from(kind: OrderDeltaType) -> Self {
        match kind {
            OrderDeltaType::Open => 0,
            OrderDeltaType::Partial => 1,
            OrderDeltaType::Fill => 2,
            OrderDeltaType::Cancel => 3,
        }
    }
}

/// Order record carried by an order delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOrder {
    /// Order record id.
    #[serde(default)]
    pub uuid: Option<String>,
    /// Public order id.
    pub order_uuid: String,
    /// Numeric id.
    #[serde(default)]
    pub id: Option<u64>,
    /// Market symbol.
    pub exchange: String,
    /// `LIMIT_BUY` or `LIMIT_SELL`.
    pub order_type: String,
    /// Ordered quantity.
    pub quantity: Decimal,
    /// Quantity still open.
    pub quantity_remaining: Decimal,
    /// Limit price.
    #[serde(default)]
    pub limit: Option<Decimal>,
    /// Commission paid so far.
    #[serde(default)]
    pub commission_paid: Option<Decimal>,
    /// Total price paid so far.
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Average fill price.
    #[serde(default)]
    pub price_per_unit: Option<Decimal>,
    /// Epoch milliseconds the order was opened.
    #[serde(default)]
    pub opened: Option<i64>,
    /// Epoch milliseconds the order was closed.
    #[serde(default)]
    pub closed: Option<i64>,
    /// Whether the order is still open.
    #[serde(default)]
    pub is_open: Option<bool>,
    /// Whether a cancel was requested.
    #[serde(default)]
    pub cancel_initiated: Option<bool>,
    /// Immediate-or-cancel flag.
    #[serde(default)]
    pub immediate_or_cancel: Option<bool>,
    /// Conditional order flag.
    #[serde(default)]
    pub is_conditional: Option<bool>,
    /// Condition kind.
    #[serde(default)]
    pub condition: Option<String>,
    /// Condition trigger.
    #[serde(default)]
    pub condition_target: Option<Decimal>,
    /// Epoch milliseconds of the change.
    #[serde(default)]
    pub updated: Option<i64>,
}

/// `uO`: order change on the authenticated account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDelta {
    /// Account the order belongs to.
    #[serde(default)]
    pub account_uuid: Option<String>,
    /// Account feed nonce.
    pub nonce: u64,
    /// What happened to the order.
    #[serde(rename = "type")]
    pub kind: OrderDeltaType,
    /// Order after the change.
    pub order: AccountOrder,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    use crate::protocol::keys::expand_keys;

    #[test]
    fn exchange_delta_from_expanded_keys() {
        let value = expand_keys(json!({
            "M": "BTC-TRX",
            "N": 11919,
            "Z": [],
            "S": [{"TY": 2, "R": 8.7e-06, "Q": 197473.52148216}],
            "f": [{"OT": "BUY", "R": 8.7e-06, "Q": 28376.84449489, "T": 1524905878547i64}]
        }));

        let delta: ExchangeDelta = serde_json::from_value(value).unwrap();

        assert_eq!(delta.market_name, "BTC-TRX");
        assert_eq!(delta.nonce, 11919);
        assert_eq!(delta.sells[0].op, LevelOp::Update);
        assert_eq!(delta.sells[0].rate, dec!(0.0000087));
        assert_eq!(delta.fills[0].order_type, "BUY");

        let ops = delta.operations();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].side, Side::Sell);
    }

    #[test]
    fn exchange_state_with_null_market() {
        let value = expand_keys(json!({
            "M": null,
            "N": 11333,
            "Z": [{"Q": 428996.57288094, "R": 8.65e-06}],
            "S": [{"Q": 91814.92314615, "R": 8.66e-06}],
            "f": [{
                "I": 5020055, "T": 1524904823903i64, "Q": 34413.0, "P": 8.66e-06,
                "t": 0.29801658, "F": "FILL", "OT": "BUY"
            }]
        }));

        let state: ExchangeState = serde_json::from_value(value).unwrap();

        assert!(state.market_name.is_none());
        assert_eq!(state.buys[0].quantity, dec!(428996.57288094));
        assert_eq!(state.fills[0].id, 5020055);
    }

    #[test]
    fn order_delta_type_codes() {
        let value = expand_keys(json!({
            "w": "account",
            "N": 3,
            "TY": 3,
            "o": {
                "OU": "order-1", "E": "BTC-ETH", "OT": "LIMIT_BUY",
                "Q": 1.5, "q": 0.5, "X": 0.07
            }
        }));

        let delta: OrderDelta = serde_json::from_value(value).unwrap();

        assert_eq!(delta.kind, OrderDeltaType::Cancel);
        assert_eq!(delta.order.exchange, "BTC-ETH");
        assert_eq!(delta.order.limit, Some(dec!(0.07)));
    }
}
