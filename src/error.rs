//! Unified error types for the feed client.

use std::time::Duration;

use thiserror::Error;

use crate::stream::channel::Channel;

/// Unified error type for the feed client.
#[derive(Error, Debug)]
pub enum FeedError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed frame or payload.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Snapshot fetch failure.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Account authentication failure.
    #[error("authentication error: {0}")]
    Authentication(#[from] AuthenticationError),

    /// The client has been shut down.
    #[error("stream client is closed")]
    Closed,

    /// HTTP request error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection-level errors. Always retried with backoff.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed.
    #[error("websocket connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed by the remote side or the stream ended.
    #[error("websocket connection closed: code={code:?}, reason={reason}")]
    ConnectionClosed {
        /// Close code.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },

    /// SignalR negotiate handshake failed.
    #[error("negotiate failed: {0}")]
    Negotiate(String),

    /// Send failed.
    #[error("failed to send websocket message: {0}")]
    SendFailed(String),

    /// No frame arrived within the idle timeout.
    #[error("no frame received for {0:?}")]
    IdleTimeout(Duration),

    /// Connect attempt did not finish in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Too many consecutive malformed frames.
    #[error("{0} consecutive protocol errors")]
    ProtocolErrors(u32),

    /// Tungstenite error.
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP error during the handshake.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Malformed frame or payload errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame is not valid JSON or has an unexpected shape.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Payload is not valid base64.
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),

    /// Payload could not be inflated.
    #[error("failed to inflate payload: {0}")]
    Decompress(String),

    /// Payload JSON does not match the expected message.
    #[error("unexpected {method} payload: {reason}")]
    UnexpectedPayload {
        /// Hub method or query the payload belongs to.
        method: String,
        /// Reason for failure.
        reason: String,
    },

    /// The hub reported an error.
    #[error("hub error: {0}")]
    Hub(String),
}

/// Account authentication errors. Terminal for the affected subscription.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// No API key or secret configured.
    #[error("api key and secret are required for the account feed")]
    MissingCredentials,

    /// The hub rejected the auth context request or the signature.
    #[error("authentication rejected: {0}")]
    Rejected(String),

    /// The auth context response did not carry a challenge.
    #[error("auth context response did not contain a challenge")]
    InvalidChallenge,
}

/// Snapshot fetch errors.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// Transport failure while fetching.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Snapshot payload could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Fetch did not finish in time.
    #[error("snapshot fetch timed out after {0:?}")]
    Timeout(Duration),

    /// Channel has no snapshot representation.
    #[error("channel {0} has no snapshot")]
    Unsupported(Channel),

    /// Source could not provide a snapshot.
    #[error("snapshot unavailable: {0}")]
    Unavailable(String),
}

/// Terminal error delivered on a subscription handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// Authentication failed; the subscription will not be retried.
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthenticationError),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, FeedError>;
