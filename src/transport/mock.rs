//! Scripted in-memory connections and snapshots for tests.
//!
//! A [`MockConnector`] hands every accepted connection to the test as a
//! [`MockSession`], which pushes inbound frames and reads what the client
//! sent. A [`MockSnapshotSource`] answers fetches from a per-channel script
//! and parks callers until a reply is scripted.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::{sink, stream, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

use super::{Connection, Connector, Inbound, Outbound, Snapshot, SnapshotSource};
use crate::error::{ProtocolError, SnapshotError, TransportError};
use crate::protocol::codec::encode_payload;
use crate::stream::channel::Channel;

/// Build a hub data frame carrying one compressed callback payload.
pub fn hub_message(method: &str, payload: &Value) -> Result<String, ProtocolError> {
    let encoded = encode_payload(payload)?;
    Ok(json!({
        "C": "d-mock,0|A,0",
        "M": [{ "H": "C2", "M": method, "A": [encoded] }]
    })
    .to_string())
}

/// Server side of one mock connection.
pub struct MockSession {
    inbound: mpsc::UnboundedSender<Result<Inbound, TransportError>>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl MockSession {
    /// Deliver a frame to the client. Returns false once the client is gone.
    pub fn push(&self, frame: Inbound) -> bool {
        self.inbound.send(Ok(frame)).is_ok()
    }

    /// Deliver a read error to the client.
    pub fn push_error(&self, error: TransportError) -> bool {
        self.inbound.send(Err(error)).is_ok()
    }

    /// Deliver a hub callback with a compressed payload.
    pub fn push_hub(&self, method: &str, payload: &Value) -> bool {
        match hub_message(method, payload) {
            Ok(text) => self.push(Inbound::Text(text)),
            Err(_) => false,
        }
    }

    /// Answer invocation `id` with `result`.
    pub fn respond(&self, id: u64, result: Value) -> bool {
        self.push(Inbound::Text(json!({ "I": id.to_string(), "R": result }).to_string()))
    }

    /// Answer invocation `id` with a hub error.
    pub fn respond_error(&self, id: u64, error: &str) -> bool {
        self.push(Inbound::Text(json!({ "I": id.to_string(), "E": error }).to_string()))
    }

    /// Next frame the client sent, pings included.
    pub async fn next_outbound(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// Next invocation the client sent, skipping pings.
    pub async fn next_invocation(&mut self) -> Option<Value> {
        loop {
            match self.outbound.recv().await? {
                Outbound::Text(text) => return serde_json::from_str(&text).ok(),
                Outbound::Ping => continue,
            }
        }
    }

    /// Every invocation sent so far, without waiting.
    pub fn sent_invocations(&mut self) -> Vec<Value> {
        let mut sent = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            if let Outbound::Text(text) = frame {
                if let Ok(value) = serde_json::from_str(&text) {
                    sent.push(value);
                }
            }
        }
        sent
    }

    /// End the inbound stream, as if the server hung up.
    pub fn hang_up(self) {}
}

/// Connector that hands each connection to the test.
pub struct MockConnector {
    sessions: mpsc::UnboundedSender<MockSession>,
    fail_next: AtomicUsize,
    connects: AtomicUsize,
}

impl MockConnector {
    /// Create a connector and the receiver of its sessions.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockSession>) {
        let (sessions, rx) = mpsc::unbounded_channel();
        let connector = Self {
            sessions,
            fail_next: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
        };
        (connector, rx)
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Number of connect attempts so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Connection, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::ConnectionFailed("scripted failure".to_string()));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        self.sessions
            .send(MockSession {
                inbound: inbound_tx,
                outbound: outbound_rx,
            })
            .map_err(|_| TransportError::ConnectionFailed("no mock server listening".to_string()))?;

        let stream = stream::unfold(inbound_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        let sink = sink::unfold(outbound_tx, |tx: mpsc::UnboundedSender<Outbound>, frame: Outbound| async move {
            tx.send(frame)
                .map_err(|_| TransportError::SendFailed("mock session dropped".to_string()))?;
            Ok::<_, TransportError>(tx)
        });

        Ok(Connection {
            sink: Box::pin(sink),
            stream: stream.boxed(),
        })
    }
}

/// Snapshot source answering from a script.
#[derive(Default)]
pub struct MockSnapshotSource {
    scripted: Mutex<HashMap<Channel, VecDeque<Result<Snapshot, SnapshotError>>>>,
    requests: Mutex<Vec<Channel>>,
    notify: Notify,
}

impl MockSnapshotSource {
    /// Create an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next fetch of `channel`.
    pub fn push(&self, channel: Channel, reply: Result<Snapshot, SnapshotError>) {
        self.scripted
            .lock()
            .entry(channel)
            .or_default()
            .push_back(reply);
        self.notify.notify_waiters();
    }

    /// Every fetch so far, in order.
    pub fn requests(&self) -> Vec<Channel> {
        self.requests.lock().clone()
    }

    /// Number of fetches of `channel` so far.
    pub fn request_count(&self, channel: &Channel) -> usize {
        self.requests.lock().iter().filter(|c| *c == channel).count()
    }

    fn take(&self, channel: &Channel) -> Option<Result<Snapshot, SnapshotError>> {
        self.scripted.lock().get_mut(channel)?.pop_front()
    }
}

#[async_trait]
impl SnapshotSource for MockSnapshotSource {
    async fn fetch_snapshot(&self, channel: &Channel) -> Result<Snapshot, SnapshotError> {
        self.requests.lock().push(channel.clone());

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(reply) = self.take(channel) {
                return reply;
            }
            notified.await;
        }
    }
}
