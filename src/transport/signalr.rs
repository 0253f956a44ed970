//! SignalR v1 WebSocket connector.
//!
//! Connecting takes two steps: an HTTP `negotiate` call that returns a
//! connection token, then a WebSocket upgrade on the `connect` endpoint.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use super::{Connection, Connector, Inbound, Outbound};
use crate::config::Config;
use crate::error::TransportError;

const CLIENT_PROTOCOL: &str = "1.5";
const TRANSPORT: &str = "webSockets";

/// `negotiate` response; only the fields the connect step needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NegotiateResponse {
    /// Opaque token for the connect URL.
    pub connection_token: String,
    /// Protocol version the server speaks.
    #[serde(default)]
    pub protocol_version: Option<String>,
    /// Server keep-alive timeout in seconds.
    #[serde(default)]
    pub keep_alive_timeout: Option<f64>,
    /// Whether the server accepts WebSockets.
    #[serde(default)]
    pub try_web_sockets: Option<bool>,
}

/// Opens WebSocket connections to a SignalR hub.
pub struct SignalRConnector {
    http: reqwest::Client,
    base_url: Url,
    hub: String,
}

impl SignalRConnector {
    /// Create a connector for `base_url` (ending in `/signalr/`) and `hub`.
    pub fn new(base_url: &str, hub: &str, http_timeout: Duration) -> Result<Self, TransportError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| TransportError::ConnectionFailed(format!("invalid socket url: {}", e)))?;

        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(TransportError::Http)?;

        Ok(Self {
            http,
            base_url,
            hub: hub.to_string(),
        })
    }

    /// Create from the loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        Self::new(
            &config.bittrex_socket_url,
            &config.bittrex_socket_hub,
            Duration::from_millis(config.http_timeout_ms),
        )
    }

    /// Hub the connector targets.
    pub fn hub(&self) -> &str {
        &self.hub
    }

    fn connection_data(&self) -> String {
        serde_json::json!([{ "name": self.hub }]).to_string()
    }

    /// URL of the `negotiate` call.
    pub fn negotiate_url(&self) -> Result<Url, TransportError> {
        let mut url = self
            .base_url
            .join("negotiate")
            .map_err(|e| TransportError::Negotiate(e.to_string()))?;

        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        url.query_pairs_mut()
            .append_pair("clientProtocol", CLIENT_PROTOCOL)
            .append_pair("connectionData", &self.connection_data())
            .append_pair("_", &nonce.to_string());
        Ok(url)
    }

    /// URL of the WebSocket `connect` call for a negotiated token.
    pub fn connect_url(&self, negotiated: &NegotiateResponse) -> Result<Url, TransportError> {
        let mut url = self
            .base_url
            .join("connect")
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| TransportError::ConnectionFailed(format!("cannot use scheme {}", scheme)))?;

        let protocol = negotiated
            .protocol_version
            .as_deref()
            .unwrap_or(CLIENT_PROTOCOL);

        url.query_pairs_mut()
            .append_pair("transport", TRANSPORT)
            .append_pair("clientProtocol", protocol)
            .append_pair("connectionToken", &negotiated.connection_token)
            .append_pair("connectionData", &self.connection_data())
            .append_pair("tid", "3");
        Ok(url)
    }

    /// Perform the `negotiate` call.
    pub async fn negotiate(&self) -> Result<NegotiateResponse, TransportError> {
        let url = self.negotiate_url()?;
        debug!(url = %url, "negotiating");

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Negotiate(format!("status {}", status)));
        }

        let negotiated: NegotiateResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Negotiate(e.to_string()))?;

        if negotiated.try_web_sockets == Some(false) {
            warn!("server does not advertise websocket support, trying anyway");
        }
        Ok(negotiated)
    }
}

fn inbound(message: Message) -> Inbound {
    match message {
        Message::Text(text) => Inbound::Text(text),
        Message::Binary(bytes) => Inbound::Text(String::from_utf8_lossy(&bytes).into_owned()),
        Message::Close(frame) => Inbound::Closed {
            code: frame.as_ref().map(|f| u16::from(f.code)),
            reason: frame.map(|f| f.reason.into_owned()).unwrap_or_default(),
        },
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Inbound::Heartbeat,
    }
}

fn outbound(frame: Outbound) -> Message {
    match frame {
        Outbound::Text(text) => Message::Text(text),
        Outbound::Ping => Message::Ping(Vec::new()),
    }
}

#[async_trait]
impl Connector for SignalRConnector {
    async fn connect(&self) -> Result<Connection, TransportError> {
        let negotiated = self.negotiate().await?;
        let url = self.connect_url(&negotiated)?;

        info!(hub = %self.hub, host = ?url.host_str(), "Connecting to WebSocket");

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| TransportError::SendFailed(e.to_string()))
            .with(|frame: Outbound| future::ready(Ok::<_, TransportError>(outbound(frame))));

        let stream = read.map(|message| message.map(inbound).map_err(TransportError::from));

        Ok(Connection {
            sink: Box::pin(sink),
            stream: stream.boxed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn connector() -> SignalRConnector {
        SignalRConnector::new(
            "https://socket.bittrex.com/signalr/",
            "c2",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn query(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn negotiate_url_carries_hub_and_protocol() {
        let url = connector().negotiate_url().unwrap();

        assert_eq!(url.path(), "/signalr/negotiate");
        assert_eq!(query(&url, "clientProtocol").as_deref(), Some("1.5"));
        assert_eq!(
            query(&url, "connectionData").as_deref(),
            Some(r#"[{"name":"c2"}]"#)
        );
        assert!(query(&url, "_").is_some());
    }

    #[test]
    fn connect_url_switches_to_websocket_scheme() {
        let negotiated = NegotiateResponse {
            connection_token: "tok+en/=".to_string(),
            protocol_version: Some("1.5".to_string()),
            keep_alive_timeout: Some(20.0),
            try_web_sockets: Some(true),
        };

        let url = connector().connect_url(&negotiated).unwrap();

        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/signalr/connect");
        assert_eq!(query(&url, "transport").as_deref(), Some("webSockets"));
        assert_eq!(query(&url, "connectionToken").as_deref(), Some("tok+en/="));
        assert_eq!(query(&url, "tid").as_deref(), Some("3"));
    }

    #[test]
    fn parses_negotiate_response() {
        let body = r#"{"Url":"/signalr","ConnectionToken":"abc","ConnectionId":"id",
            "KeepAliveTimeout":20.0,"DisconnectTimeout":30.0,"TryWebSockets":true,
            "ProtocolVersion":"1.5"}"#;

        let negotiated: NegotiateResponse = serde_json::from_str(body).unwrap();

        assert_eq!(negotiated.connection_token, "abc");
        assert_eq!(negotiated.protocol_version.as_deref(), Some("1.5"));
    }

    #[test]
    fn maps_websocket_messages() {
        assert_eq!(inbound(Message::Text("{}".into())), Inbound::Text("{}".into()));
        assert_eq!(inbound(Message::Pong(Vec::new())), Inbound::Heartbeat);
        assert_eq!(
            inbound(Message::Close(None)),
            Inbound::Closed {
                code: None,
                reason: String::new(),
            }
        );
        assert_eq!(outbound(Outbound::Ping), Message::Ping(Vec::new()));
    }
}
