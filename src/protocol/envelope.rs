//! Routing envelopes: one decoded hub callback argument tagged with its channel.

use serde_json::Value;
use tracing::debug;

use super::codec::decode_typed;
use super::frames::{methods, HubMessage};
use super::messages::{BalanceDelta, ExchangeDelta, OrderDelta, SummaryDeltas, SummaryLiteDeltas};
use crate::error::ProtocolError;
use crate::stream::channel::Channel;

/// Decoded callback payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// `uE`.
    ExchangeDelta(ExchangeDelta),
    /// `uS`.
    SummaryDeltas(SummaryDeltas),
    /// `uL`.
    SummaryLite(SummaryLiteDeltas),
    /// `uB`.
    Balance(BalanceDelta),
    /// `uO`.
    Order(OrderDelta),
}

/// A decoded message ready for routing.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Target channel.
    pub channel: Channel,
    /// Sequence number; absent for light summaries.
    pub nonce: Option<u64>,
    /// Typed payload.
    pub payload: Payload,
}

impl Envelope {
    /// Decode every argument of a hub callback.
    ///
    /// Unknown callbacks yield nothing.
    pub fn decode(message: &HubMessage) -> Result<Vec<Envelope>, ProtocolError> {
        let method = message.method.as_str();
        if !is_known_callback(method) {
            debug!(method, "ignoring unknown hub callback");
            return Ok(Vec::new());
        }

        message
            .args
            .iter()
            .map(|arg| Self::decode_arg(method, arg))
            .collect()
    }

    fn decode_arg(method: &str, arg: &Value) -> Result<Envelope, ProtocolError> {
        let encoded = arg.as_str().ok_or_else(|| ProtocolError::UnexpectedPayload {
            method: method.to_string(),
            reason: "argument is not a string".to_string(),
        })?;

        let envelope = match method {
            methods::EXCHANGE_DELTA => {
                let delta: ExchangeDelta = decode_typed(encoded, method)?;
                Envelope {
                    channel: Channel::market(delta.market_name.clone()),
                    nonce: Some(delta.nonce),
                    payload: Payload::ExchangeDelta(delta),
                }
            }
            methods::SUMMARY_DELTA => {
                let deltas: SummaryDeltas = decode_typed(encoded, method)?;
                Envelope {
                    channel: Channel::MarketSummaries,
                    nonce: Some(deltas.nonce),
                    payload: Payload::SummaryDeltas(deltas),
                }
            }
            methods::SUMMARY_LITE_DELTA => Envelope {
                channel: Channel::SummaryLite,
                nonce: None,
                payload: Payload::SummaryLite(decode_typed(encoded, method)?),
            },
            methods::BALANCE_DELTA => {
                let delta: BalanceDelta = decode_typed(encoded, method)?;
                Envelope {
                    channel: Channel::AccountUpdates,
                    nonce: Some(delta.nonce),
                    payload: Payload::Balance(delta),
                }
            }
            _ => {
                let delta: OrderDelta = decode_typed(encoded, method)?;
                Envelope {
                    channel: Channel::AccountUpdates,
                    nonce: Some(delta.nonce),
                    payload: Payload::Order(delta),
                }
            }
        };

        Ok(envelope)
    }
}

fn is_known_callback(method: &str) -> bool {
    matches!(
        method,
        methods::EXCHANGE_DELTA
            | methods::SUMMARY_DELTA
            | methods::SUMMARY_LITE_DELTA
            | methods::BALANCE_DELTA
            | methods::ORDER_DELTA
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::encode_payload;
    use serde_json::json;

    fn message(method: &str, payloads: &[Value]) -> HubMessage {
        HubMessage {
            hub: Some("C2".to_string()),
            method: method.to_string(),
            args: payloads
                .iter()
                .map(|p| Value::String(encode_payload(p).unwrap()))
                .collect(),
        }
    }

    #[test]
    fn exchange_delta_routes_to_market_channel() {
        let msg = message(
            "uE",
            &[json!({"M": "BTC-ETH", "N": 101, "Z": [{"TY": 1, "R": 10, "Q": 0}], "S": [], "f": []})],
        );

        let envelopes = Envelope::decode(&msg).unwrap();

        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].channel, Channel::market("BTC-ETH"));
        assert_eq!(envelopes[0].nonce, Some(101));
    }

    #[test]
    fn every_argument_becomes_an_envelope() {
        let msg = message(
            "uS",
            &[
                json!({"N": 1, "D": [{"M": "BTC-ETH", "l": 0.07}]}),
                json!({"N": 2, "D": []}),
            ],
        );

        let envelopes = Envelope::decode(&msg).unwrap();

        assert_eq!(
            envelopes.iter().map(|e| e.nonce).collect::<Vec<_>>(),
            vec![Some(1), Some(2)]
        );
        assert!(envelopes.iter().all(|e| e.channel == Channel::MarketSummaries));
    }

    #[test]
    fn light_summaries_are_unsequenced() {
        let msg = message("uL", &[json!({"D": [{"M": "BTC-ADT", "l": 7.37e-06, "m": 118.05}]})]);

        let envelopes = Envelope::decode(&msg).unwrap();

        assert_eq!(envelopes[0].channel, Channel::SummaryLite);
        assert_eq!(envelopes[0].nonce, None);
    }

    #[test]
    fn unknown_callback_is_ignored() {
        let msg = message("uX", &[json!({})]);
        assert!(Envelope::decode(&msg).unwrap().is_empty());
    }

    #[test]
    fn mismatched_payload_is_a_protocol_error() {
        let msg = message("uE", &[json!({"N": "not a nonce"})]);
        assert!(matches!(
            Envelope::decode(&msg),
            Err(ProtocolError::UnexpectedPayload { .. })
        ));
    }
}
