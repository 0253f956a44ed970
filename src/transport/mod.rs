//! Connection and snapshot collaborators of the supervisor.
//!
//! This module handles:
//! - The SignalR negotiate/connect handshake over WebSocket
//! - Snapshot queries on a dedicated connection
//! - Account challenge signing
//! - Scripted in-memory connections for tests

pub mod auth;
pub mod mock;
pub mod signalr;
pub mod snapshot;

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::Sink;

use crate::error::{SnapshotError, TransportError};
use crate::market::SummaryBoard;
use crate::orderbook::types::OrderBookState;
use crate::stream::channel::Channel;

pub use auth::Credentials;
pub use mock::{MockConnector, MockSession, MockSnapshotSource};
pub use signalr::SignalRConnector;
pub use snapshot::SocketSnapshotSource;

/// Frame received from the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Text frame.
    Text(String),
    /// Ping, pong or other control traffic; counts as liveness only.
    Heartbeat,
    /// Close frame.
    Closed {
        /// Close code.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
}

/// Frame sent on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Text frame.
    Text(String),
    /// WebSocket ping.
    Ping,
}

/// Outbound half of a connection.
pub type OutboundSink = Pin<Box<dyn Sink<Outbound, Error = TransportError> + Send>>;

/// Inbound half of a connection.
pub type InboundStream = BoxStream<'static, Result<Inbound, TransportError>>;

/// An open connection, split into its two halves.
pub struct Connection {
    /// Outbound frames.
    pub sink: OutboundSink,
    /// Inbound frames.
    pub stream: InboundStream,
}

/// Opens connections to the hub.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new connection.
    async fn connect(&self) -> Result<Connection, TransportError>;
}

/// Full state of a sequenced channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    /// Order book for one market.
    OrderBook(OrderBookState),
    /// Summaries for every market.
    Summaries(SummaryBoard),
}

impl Snapshot {
    /// Nonce the snapshot is current at.
    pub fn nonce(&self) -> u64 {
        match self {
            Snapshot::OrderBook(book) => book.nonce,
            Snapshot::Summaries(board) => board.nonce,
        }
    }
}

/// Fetches snapshots for sequenced channels.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch the current state of `channel`.
    async fn fetch_snapshot(&self, channel: &Channel) -> Result<Snapshot, SnapshotError>;
}
