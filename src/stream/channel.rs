//! Logical feed channels.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::protocol::frames::methods;

/// A logical feed a caller can subscribe to.
///
/// Market symbols are passed through to the hub verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Order book deltas and fills for one market.
    MarketOrders(String),
    /// Sequenced summaries for every market.
    MarketSummaries,
    /// Unsequenced light summaries (last price and base volume).
    SummaryLite,
    /// Balance and order changes of the authenticated account.
    AccountUpdates,
}

impl Channel {
    /// Order book channel for a market.
    pub fn market(symbol: impl Into<String>) -> Self {
        Channel::MarketOrders(symbol.into())
    }

    /// Whether updates carry nonces and need a snapshot.
    pub fn is_sequenced(&self) -> bool {
        matches!(self, Channel::MarketOrders(_) | Channel::MarketSummaries)
    }

    /// Whether the channel needs account credentials.
    pub fn requires_auth(&self) -> bool {
        matches!(self, Channel::AccountUpdates)
    }

    /// Hub method and arguments that start the feed.
    ///
    /// The account feed starts through the authentication exchange instead.
    pub fn subscribe_call(&self) -> Option<(&'static str, Vec<String>)> {
        match self {
            Channel::MarketOrders(symbol) => {
                Some((methods::SUBSCRIBE_EXCHANGE_DELTAS, vec![symbol.clone()]))
            }
            Channel::MarketSummaries => Some((methods::SUBSCRIBE_SUMMARY_DELTAS, Vec::new())),
            Channel::SummaryLite => Some((methods::SUBSCRIBE_SUMMARY_LITE_DELTAS, Vec::new())),
            Channel::AccountUpdates => None,
        }
    }

    /// Hub method and arguments that return a snapshot.
    pub fn snapshot_call(&self) -> Option<(&'static str, Vec<String>)> {
        match self {
            Channel::MarketOrders(symbol) => {
                Some((methods::QUERY_EXCHANGE_STATE, vec![symbol.clone()]))
            }
            Channel::MarketSummaries => Some((methods::QUERY_SUMMARY_STATE, Vec::new())),
            Channel::SummaryLite | Channel::AccountUpdates => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::MarketOrders(symbol) => write!(f, "orders:{}", symbol),
            Channel::MarketSummaries => write!(f, "summaries"),
            Channel::SummaryLite => write!(f, "summaries-lite"),
            Channel::AccountUpdates => write!(f, "account"),
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summaries" => Ok(Channel::MarketSummaries),
            "summaries-lite" => Ok(Channel::SummaryLite),
            "account" => Ok(Channel::AccountUpdates),
            other => match other.strip_prefix("orders:") {
                Some(symbol) if !symbol.is_empty() => Ok(Channel::market(symbol)),
                _ => Err(format!("unknown channel: {}", other)),
            },
        }
    }
}

impl Serialize for Channel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_agree() {
        for channel in [
            Channel::market("BTC-ETH"),
            Channel::MarketSummaries,
            Channel::SummaryLite,
            Channel::AccountUpdates,
        ] {
            assert_eq!(channel.to_string().parse::<Channel>().unwrap(), channel);
        }
        assert!("orders:".parse::<Channel>().is_err());
        assert!("trades".parse::<Channel>().is_err());
    }

    #[test]
    fn equality_is_by_variant_and_symbol() {
        assert_eq!(Channel::market("BTC-ETH"), Channel::market("BTC-ETH"));
        assert_ne!(Channel::market("BTC-ETH"), Channel::market("btc-eth"));
    }

    #[test]
    fn hub_calls_per_channel() {
        let (method, args) = Channel::market("BTC-ETH").subscribe_call().unwrap();
        assert_eq!(method, "SubscribeToExchangeDeltas");
        assert_eq!(args, vec!["BTC-ETH".to_string()]);

        assert!(Channel::AccountUpdates.subscribe_call().is_none());
        assert!(Channel::SummaryLite.snapshot_call().is_none());
        assert!(Channel::MarketSummaries.is_sequenced());
        assert!(!Channel::SummaryLite.is_sequenced());
    }
}
