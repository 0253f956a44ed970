//! SignalR v1 hub frames.
//!
//! Inbound text frames come in four shapes:
//! - `{}` keep-alive
//! - `{"C": cursor, "S": 1, "M": []}` connection init
//! - `{"C": cursor, "M": [{"H": hub, "M": method, "A": [args]}]}` hub messages
//! - `{"I": id, "R": result}` / `{"I": id, "E": error}` invocation responses

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Hub method names.
pub mod methods {
    /// Start order book deltas for a market.
    pub const SUBSCRIBE_EXCHANGE_DELTAS: &str = "SubscribeToExchangeDeltas";
    /// Start sequenced summary deltas.
    pub const SUBSCRIBE_SUMMARY_DELTAS: &str = "SubscribeToSummaryDeltas";
    /// Start light summary deltas.
    pub const SUBSCRIBE_SUMMARY_LITE_DELTAS: &str = "SubscribeToSummaryLiteDeltas";
    /// Order book snapshot for a market.
    pub const QUERY_EXCHANGE_STATE: &str = "QueryExchangeState";
    /// Summary snapshot for every market.
    pub const QUERY_SUMMARY_STATE: &str = "QuerySummaryState";
    /// Request an authentication challenge.
    pub const GET_AUTH_CONTEXT: &str = "GetAuthContext";
    /// Answer the challenge; starts the account feed.
    pub const AUTHENTICATE: &str = "Authenticate";

    /// Callback: exchange delta.
    pub const EXCHANGE_DELTA: &str = "uE";
    /// Callback: summary delta.
    pub const SUMMARY_DELTA: &str = "uS";
    /// Callback: light summary delta.
    pub const SUMMARY_LITE_DELTA: &str = "uL";
    /// Callback: balance delta.
    pub const BALANCE_DELTA: &str = "uB";
    /// Callback: order delta.
    pub const ORDER_DELTA: &str = "uO";
}

/// Outbound hub invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    /// Hub name.
    #[serde(rename = "H")]
    pub hub: String,
    /// Method name.
    #[serde(rename = "M")]
    pub method: String,
    /// Arguments.
    #[serde(rename = "A")]
    pub args: Vec<String>,
    /// Invocation id, echoed back in the response.
    #[serde(rename = "I")]
    pub id: u64,
}

impl Invocation {
    /// Create a new invocation.
    pub fn new(hub: &str, method: &str, args: Vec<String>, id: u64) -> Self {
        Self {
            hub: hub.to_string(),
            method: method.to_string(),
            args,
            id,
        }
    }

    /// Serialize to the wire form.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::InvalidFrame(e.to_string()))
    }
}

/// Hub message inside a data frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HubMessage {
    /// Hub name (the server capitalizes it).
    #[serde(rename = "H", default)]
    pub hub: Option<String>,
    /// Callback name, e.g. `uE`.
    #[serde(rename = "M")]
    pub method: String,
    /// Compressed payloads.
    #[serde(rename = "A", default)]
    pub args: Vec<Value>,
}

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum HubFrame {
    /// Keep-alive or connection init; carries nothing to route.
    KeepAlive,
    /// Response to one of our invocations.
    Response {
        /// Invocation id.
        id: u64,
        /// Result, when the call succeeded.
        result: Option<Value>,
        /// Error message, when the call failed.
        error: Option<String>,
    },
    /// Hub callbacks.
    Messages(Vec<HubMessage>),
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "M", default)]
    messages: Option<Vec<HubMessage>>,
    #[serde(rename = "I", default)]
    id: Option<Value>,
    #[serde(rename = "R", default)]
    result: Option<Value>,
    #[serde(rename = "E", default)]
    error: Option<String>,
}

impl HubFrame {
    /// Parse one inbound text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawFrame = serde_json::from_str(text)
            .map_err(|e| ProtocolError::InvalidFrame(e.to_string()))?;

        if let Some(id) = raw.id {
            return Ok(HubFrame::Response {
                id: parse_invocation_id(&id)?,
                result: raw.result,
                error: raw.error,
            });
        }

        if let Some(error) = raw.error {
            return Err(ProtocolError::Hub(error));
        }

        match raw.messages {
            Some(messages) if !messages.is_empty() => Ok(HubFrame::Messages(messages)),
            _ => Ok(HubFrame::KeepAlive),
        }
    }
}

/// Invocation ids come back as strings or numbers.
fn parse_invocation_id(id: &Value) -> Result<u64, ProtocolError> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| ProtocolError::InvalidFrame(format!("invalid invocation id: {}", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invocation_wire_form() {
        let invocation = Invocation::new(
            "c2",
            methods::SUBSCRIBE_EXCHANGE_DELTAS,
            vec!["BTC-ETH".to_string()],
            3,
        );

        let value: Value = serde_json::from_str(&invocation.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({"H": "c2", "M": "SubscribeToExchangeDeltas", "A": ["BTC-ETH"], "I": 3})
        );
    }

    #[test]
    fn parses_keep_alive_and_init() {
        assert_eq!(HubFrame::parse("{}").unwrap(), HubFrame::KeepAlive);
        assert_eq!(
            HubFrame::parse(r#"{"C":"d-1,0|B,0","S":1,"M":[]}"#).unwrap(),
            HubFrame::KeepAlive
        );
    }

    #[test]
    fn parses_response_with_string_id() {
        let frame = HubFrame::parse(r#"{"R":true,"I":"4"}"#).unwrap();

        assert_eq!(
            frame,
            HubFrame::Response {
                id: 4,
                result: Some(json!(true)),
                error: None,
            }
        );
    }

    #[test]
    fn parses_error_response() {
        let frame = HubFrame::parse(r#"{"I":2,"E":"There was an error invoking Hub method"}"#)
            .unwrap();

        assert!(matches!(frame, HubFrame::Response { id: 2, error: Some(_), .. }));
    }

    #[test]
    fn parses_hub_messages() {
        let frame =
            HubFrame::parse(r#"{"C":"d-1","M":[{"H":"C2","M":"uE","A":["abc"]}]}"#).unwrap();

        let HubFrame::Messages(messages) = frame else {
            panic!("expected messages");
        };
        assert_eq!(messages[0].method, "uE");
        assert_eq!(messages[0].args, vec![json!("abc")]);
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(HubFrame::parse("not json").is_err());
        assert!(HubFrame::parse(r#"{"I":[1]}"#).is_err());
        assert!(matches!(
            HubFrame::parse(r#"{"E":"boom"}"#),
            Err(ProtocolError::Hub(_))
        ));
    }
}
