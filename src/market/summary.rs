//! Market summary records and the board maintained from the summary feed.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::protocol::messages::{SummaryDeltas, SummaryState};
use crate::stream::sequenced::Sequenced;

/// 24h summary for one market. Replaced wholesale on every delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSummary {
    /// Market symbol.
    pub market_name: String,
    /// 24h high.
    #[serde(default)]
    pub high: Option<Decimal>,
    /// 24h low.
    #[serde(default)]
    pub low: Option<Decimal>,
    /// 24h volume in the market currency.
    #[serde(default)]
    pub volume: Option<Decimal>,
    /// Last trade price.
    #[serde(default)]
    pub last: Option<Decimal>,
    /// 24h volume in the base currency.
    #[serde(default)]
    pub base_volume: Option<Decimal>,
    /// Epoch milliseconds of the summary.
    #[serde(default)]
    pub time_stamp: Option<i64>,
    /// Best bid.
    #[serde(default)]
    pub bid: Option<Decimal>,
    /// Best ask.
    #[serde(default)]
    pub ask: Option<Decimal>,
    /// Number of open buy orders.
    #[serde(default)]
    pub open_buy_orders: Option<u64>,
    /// Number of open sell orders.
    #[serde(default)]
    pub open_sell_orders: Option<u64>,
    /// Price 24h ago.
    #[serde(default)]
    pub prev_day: Option<Decimal>,
    /// Epoch milliseconds the market was listed.
    #[serde(default)]
    pub created: Option<i64>,
}

impl MarketSummary {
    /// Change of `last` against `prev_day`, in percent.
    pub fn change_pct(&self) -> Option<Decimal> {
        match (self.last, self.prev_day) {
            (Some(last), Some(prev)) if !prev.is_zero() => {
                Some((last - prev) / prev * Decimal::ONE_HUNDRED)
            }
            _ => None,
        }
    }

    /// Summary time as a UTC timestamp.
    pub fn timestamp(&self) -> Option<OffsetDateTime> {
        let millis = self.time_stamp?;
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
    }
}

/// Every market's latest summary, current at `nonce`.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryBoard {
    /// Nonce of the last applied snapshot or delta.
    pub nonce: u64,
    /// Summaries keyed by market symbol.
    pub summaries: BTreeMap<String, MarketSummary>,
    /// When this board was last updated.
    pub updated_at: OffsetDateTime,
}

impl SummaryBoard {
    /// Build a board from a snapshot.
    pub fn new(nonce: u64, summaries: impl IntoIterator<Item = MarketSummary>) -> Self {
        Self {
            nonce,
            summaries: summaries
                .into_iter()
                .map(|s| (s.market_name.clone(), s))
                .collect(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    /// Build a board from a `QuerySummaryState` snapshot.
    pub fn from_summary_state(state: SummaryState) -> Self {
        Self::new(state.nonce, state.summaries)
    }

    /// Look up one market.
    pub fn get(&self, market: &str) -> Option<&MarketSummary> {
        self.summaries.get(market)
    }

    /// Overwrite the given markets.
    pub fn upsert(&mut self, changed: &[MarketSummary]) {
        for summary in changed {
            self.summaries
                .insert(summary.market_name.clone(), summary.clone());
        }
        self.updated_at = OffsetDateTime::now_utc();
    }

    /// Number of markets on the board.
    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    /// Check if the board has no markets.
    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }
}

impl Sequenced for SummaryBoard {
    type Delta = SummaryDeltas;

    fn nonce(&self) -> u64 {
        self.nonce
    }

    fn merge(&mut self, nonce: u64, delta: &SummaryDeltas) {
        self.upsert(&delta.deltas);
        self.nonce = nonce;
    }
}
