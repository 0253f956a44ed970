//! Streaming client for the Bittrex SignalR public data feed.
//!
//! One WebSocket connection carries every subscription. Order books and
//! market summaries are rebuilt locally from a snapshot plus nonce-ordered
//! deltas; a gap in the nonces triggers a fresh snapshot instead of silently
//! corrupting the book.
//!
//! ```text
//! hub frame ──► decode ──► route by channel ──► SequencedState ──► handles
//!                                 ▲                    │
//!                                 └── snapshot fetch ◄─┘ (on gap / reconnect)
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`protocol`]: Hub frames, payload codec and typed messages
//! - [`transport`]: SignalR connector, snapshot source, signing, mocks
//! - [`stream`]: Sequencing, routing, fan-out and the reader task
//! - [`orderbook`]: Order book state and delta merging
//! - [`market`]: Market summaries
//! - [`metrics`]: Prometheus metrics
//! - [`api`]: HTTP API for health/metrics
//! - [`utils`]: Utility functions

pub mod api;
pub mod config;
pub mod error;
pub mod market;
pub mod metrics;
pub mod orderbook;
pub mod protocol;
pub mod stream;
pub mod transport;
pub mod utils;

pub use config::Config;
pub use error::{FeedError, Result};
pub use stream::{Channel, ConnectionState, StreamClient, SubscriptionHandle, Update, UpdatePayload};
