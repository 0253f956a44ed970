//! Wire protocol for the SignalR `c2` hub.
//!
//! This module handles:
//! - Parsing inbound frames and building invocations
//! - Decoding compressed payloads and expanding minified keys
//! - Typed payloads and routing envelopes

pub mod codec;
pub mod envelope;
pub mod frames;
pub mod keys;
pub mod messages;

pub use envelope::{Envelope, Payload};
pub use frames::{methods, HubFrame, HubMessage, Invocation};
