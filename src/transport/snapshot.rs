//! Snapshot queries over a dedicated hub connection.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tracing::{debug, trace};

use super::{Connector, Inbound, Outbound, Snapshot, SnapshotSource};
use crate::error::{ProtocolError, SnapshotError, TransportError};
use crate::market::SummaryBoard;
use crate::orderbook::types::OrderBookState;
use crate::protocol::codec::decode_typed;
use crate::protocol::frames::{HubFrame, Invocation};
use crate::protocol::messages::{ExchangeState, SummaryState};
use crate::stream::channel::Channel;

const QUERY_ID: u64 = 1;

/// Fetches snapshots with `QueryExchangeState` / `QuerySummaryState`.
///
/// Each fetch opens its own connection so a slow query never holds up the
/// streaming connection.
pub struct SocketSnapshotSource {
    connector: Arc<dyn Connector>,
    hub: String,
}

impl SocketSnapshotSource {
    /// Create a source that connects through `connector`.
    pub fn new(connector: Arc<dyn Connector>, hub: impl Into<String>) -> Self {
        Self {
            connector,
            hub: hub.into(),
        }
    }

    async fn query(&self, method: &str, args: Vec<String>) -> Result<String, SnapshotError> {
        let mut connection = self.connector.connect().await?;

        let invocation = Invocation::new(&self.hub, method, args, QUERY_ID).to_json()?;
        connection.sink.send(Outbound::Text(invocation)).await?;

        let result = loop {
            let frame = match connection.stream.next().await {
                Some(Ok(Inbound::Text(text))) => HubFrame::parse(&text)?,
                Some(Ok(Inbound::Heartbeat)) => continue,
                Some(Ok(Inbound::Closed { code, reason })) => {
                    return Err(TransportError::ConnectionClosed { code, reason }.into());
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(TransportError::ConnectionClosed {
                        code: None,
                        reason: "stream ended before the query was answered".to_string(),
                    }
                    .into());
                }
            };

            match frame {
                HubFrame::Response { id, result, error } if id == QUERY_ID => {
                    if let Some(error) = error {
                        return Err(ProtocolError::Hub(error).into());
                    }
                    break result;
                }
                other => trace!(?other, "ignoring frame while waiting for snapshot"),
            }
        };

        if let Err(e) = connection.sink.close().await {
            debug!(error = %e, "failed to close snapshot connection");
        }

        match result {
            Some(Value::String(encoded)) => Ok(encoded),
            other => Err(ProtocolError::UnexpectedPayload {
                method: method.to_string(),
                reason: format!("expected compressed string result, got {:?}", other),
            }
            .into()),
        }
    }
}

#[async_trait]
impl SnapshotSource for SocketSnapshotSource {
    async fn fetch_snapshot(&self, channel: &Channel) -> Result<Snapshot, SnapshotError> {
        let (method, args) = channel
            .snapshot_call()
            .ok_or_else(|| SnapshotError::Unsupported(channel.clone()))?;

        let encoded = self.query(method, args).await?;

        match channel {
            Channel::MarketOrders(market) => {
                let state: ExchangeState = decode_typed(&encoded, method)?;
                Ok(Snapshot::OrderBook(OrderBookState::from_exchange_state(
                    market.clone(),
                    &state,
                )))
            }
            _ => {
                let state: SummaryState = decode_typed(&encoded, method)?;
                Ok(Snapshot::Summaries(SummaryBoard::from_summary_state(state)))
            }
        }
    }
}
