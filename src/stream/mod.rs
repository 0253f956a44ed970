//! Streaming core: sequencing, routing, fan-out and the connection lifecycle.
//!
//! This module handles:
//! - Nonce-gated state with gap detection and snapshot resync
//! - Reference-counted channel subscriptions over one connection
//! - Bounded per-handle buffers with lag markers
//! - Reconnecting with backoff and replaying subscriptions

pub mod channel;
pub mod client;
pub mod fanout;
pub mod multiplexer;
pub mod reconnect;
pub mod sequenced;
pub mod supervisor;
pub mod update;

pub use channel::Channel;
pub use client::StreamClient;
pub use fanout::SubscriptionHandle;
pub use multiplexer::{ChannelMultiplexer, ChannelSnapshot, ChannelView, SharedViews};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use sequenced::{Applied, Seeded, Sequenced, SequencedState};
pub use supervisor::{ConnectionState, ConnectionSupervisor, StreamSettings};
pub use update::{Update, UpdatePayload};
