//! Channel registry: reference-counted subscriptions, routing and state.
//!
//! Owned by the reader task. Every channel holds its subscribers and, for
//! sequenced channels, the [`SequencedState`] they share. A read-only
//! [`ChannelView`] per channel is published into a [`DashMap`] after each
//! state change so callers can read the latest state without a round trip.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::channel::Channel;
use super::fanout::{Delivery, HandleId, Subscriber};
use super::sequenced::{Applied, Seeded, Sequenced, SequencedState};
use super::update::{Update, UpdatePayload};
use crate::error::SubscriptionError;
use crate::market::SummaryBoard;
use crate::metrics;
use crate::orderbook::types::OrderBookState;
use crate::protocol::envelope::{Envelope, Payload};
use crate::transport::Snapshot;

/// Latest state of a sequenced channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSnapshot {
    /// Order book.
    OrderBook(Arc<OrderBookState>),
    /// Summary board.
    Summaries(Arc<SummaryBoard>),
}

/// Read-only view of one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelView {
    /// Number of live handles.
    pub subscribers: usize,
    /// Nonce of the last merged update, while synced.
    pub nonce: Option<u64>,
    /// Whether deltas are being merged.
    pub synced: bool,
    /// Latest state, possibly stale while resyncing.
    #[serde(skip)]
    pub state: Option<ChannelSnapshot>,
}

/// Views shared between the reader task and callers.
pub type SharedViews = Arc<DashMap<Channel, ChannelView>>;

/// Outcome of routing one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Broadcast to this many subscribers.
    Delivered(usize),
    /// No local subscribers, or a payload that does not fit the channel.
    Dropped,
    /// Nonce already covered.
    Stale,
    /// Held until the outstanding snapshot arrives.
    Deferred,
    /// Nonce gap; a snapshot for `epoch` is needed.
    Gap {
        /// Affected channel.
        channel: Channel,
        /// Nonce that would have been accepted.
        expected: u64,
        /// Nonce that arrived.
        received: u64,
        /// Epoch the snapshot request must carry.
        epoch: u64,
    },
}

/// Outcome of installing a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotApplied {
    /// Installed and broadcast.
    Seeded {
        /// Nonce after replaying held deltas.
        nonce: u64,
        /// Number of held deltas replayed.
        replayed: usize,
    },
    /// Held deltas leave a hole; another snapshot for `epoch` is needed.
    Gap {
        /// Epoch the next request must carry.
        epoch: u64,
    },
    /// The channel is gone or no longer waiting for this epoch.
    Outdated,
}

enum ChannelFeed {
    Orders(SequencedState<OrderBookState>),
    Summaries(SequencedState<SummaryBoard>),
    /// Unsequenced channels: updates are forwarded as received.
    Passthrough,
}

impl ChannelFeed {
    fn new(channel: &Channel, pending_limit: usize) -> Self {
        match channel {
            Channel::MarketOrders(_) => ChannelFeed::Orders(SequencedState::new(pending_limit)),
            Channel::MarketSummaries => ChannelFeed::Summaries(SequencedState::new(pending_limit)),
            Channel::SummaryLite | Channel::AccountUpdates => ChannelFeed::Passthrough,
        }
    }
}

struct ChannelEntry {
    refs: usize,
    subscribers: Vec<Subscriber>,
    feed: ChannelFeed,
}

impl ChannelEntry {
    /// Deliver to every open subscriber, pruning closed ones.
    fn broadcast(&mut self, update: Update) -> usize {
        self.subscribers
            .retain(|subscriber| subscriber.deliver(update.clone()) != Delivery::Closed);
        self.subscribers.len()
    }

    fn view(&self) -> ChannelView {
        let (nonce, synced, state) = match &self.feed {
            ChannelFeed::Orders(state) => (
                state.nonce(),
                state.is_live(),
                state.last_value().cloned().map(ChannelSnapshot::OrderBook),
            ),
            ChannelFeed::Summaries(state) => (
                state.nonce(),
                state.is_live(),
                state.last_value().cloned().map(ChannelSnapshot::Summaries),
            ),
            ChannelFeed::Passthrough => (None, true, None),
        };

        ChannelView {
            subscribers: self.refs,
            nonce,
            synced,
            state,
        }
    }

    /// Full-state update for a late joiner, if the channel is synced.
    fn current(&self, channel: &Channel) -> Option<Update> {
        let payload = match &self.feed {
            ChannelFeed::Orders(state) => UpdatePayload::OrderBook {
                book: Arc::clone(state.value()?),
                delta: None,
            },
            ChannelFeed::Summaries(state) => UpdatePayload::Summaries {
                board: Arc::clone(state.value()?),
                changed: None,
            },
            ChannelFeed::Passthrough => return None,
        };

        Some(Update {
            channel: channel.clone(),
            nonce: self.view().nonce,
            payload,
            resync: true,
        })
    }
}

enum Offered {
    Merged(u64, UpdatePayload),
    Stale,
    Deferred,
    Gap { expected: u64, received: u64, epoch: u64 },
}

fn offer<T: Sequenced>(
    state: &mut SequencedState<T>,
    nonce: u64,
    delta: T::Delta,
    payload: impl FnOnce(Arc<T>, Arc<T::Delta>) -> UpdatePayload,
) -> Offered {
    match state.apply(nonce, &delta) {
        Applied::Accepted => match state.value() {
            Some(value) => Offered::Merged(nonce, payload(Arc::clone(value), Arc::new(delta))),
            None => Offered::Deferred,
        },
        Applied::Stale => Offered::Stale,
        Applied::Deferred => Offered::Deferred,
        Applied::GapDetected { expected, received } => Offered::Gap {
            expected,
            received,
            epoch: state.epoch(),
        },
    }
}

fn seed<T: Sequenced>(
    state: &mut SequencedState<T>,
    epoch: u64,
    snapshot: T,
    payload: impl FnOnce(Arc<T>) -> UpdatePayload,
) -> (SnapshotApplied, Option<UpdatePayload>) {
    if state.is_live() || state.epoch() != epoch {
        return (SnapshotApplied::Outdated, None);
    }

    match state.seed(snapshot) {
        Seeded::Live { nonce, replayed } => {
            let update = state.value().map(|value| payload(Arc::clone(value)));
            (SnapshotApplied::Seeded { nonce, replayed }, update)
        }
        Seeded::GapDetected { expected, received } => {
            debug!(expected, received, "held deltas do not connect to snapshot");
            (SnapshotApplied::Gap { epoch: state.epoch() }, None)
        }
    }
}

/// Registry of subscribed channels.
pub struct ChannelMultiplexer {
    channels: HashMap<Channel, ChannelEntry>,
    handles: HashMap<HandleId, Channel>,
    views: SharedViews,
    pending_limit: usize,
}

impl ChannelMultiplexer {
    /// Create an empty registry publishing into `views`.
    pub fn new(views: SharedViews, pending_limit: usize) -> Self {
        Self {
            channels: HashMap::new(),
            handles: HashMap::new(),
            views,
            pending_limit,
        }
    }

    /// Register a handle. Returns `true` when the channel is new and has to be
    /// subscribed on the wire.
    ///
    /// A handle joining a synced channel immediately receives the current state.
    pub(crate) fn subscribe(&mut self, id: HandleId, channel: Channel, subscriber: Subscriber) -> bool {
        let pending_limit = self.pending_limit;
        let is_new = !self.channels.contains_key(&channel);
        let entry = self
            .channels
            .entry(channel.clone())
            .or_insert_with(|| ChannelEntry {
                refs: 0,
                subscribers: Vec::new(),
                feed: ChannelFeed::new(&channel, pending_limit),
            });

        if let Some(update) = entry.current(&channel) {
            subscriber.deliver(update);
        }
        entry.subscribers.push(subscriber);
        entry.refs += 1;
        self.handles.insert(id, channel.clone());

        debug!(%channel, handle = id, refs = entry.refs, "subscribed");
        self.publish(&channel);
        metrics::set_active_subscriptions(self.handles.len());
        is_new
    }

    /// Release a handle. Returns its channel and whether it was the last one.
    ///
    /// The last release discards the channel's state.
    pub fn unsubscribe(&mut self, id: HandleId) -> Option<(Channel, bool)> {
        let channel = self.handles.remove(&id)?;
        metrics::set_active_subscriptions(self.handles.len());

        let entry = self.channels.get_mut(&channel)?;
        entry.subscribers.retain(|s| s.id() != id);
        entry.refs = entry.refs.saturating_sub(1);

        let last = entry.refs == 0;
        if last {
            self.channels.remove(&channel);
            self.views.remove(&channel);
            info!(%channel, "last subscriber left, channel released");
        } else {
            self.publish(&channel);
        }

        Some((channel, last))
    }

    /// Route a decoded envelope to its channel.
    pub fn route(&mut self, envelope: Envelope) -> Routed {
        let Envelope {
            channel,
            nonce,
            payload,
        } = envelope;

        let Some(entry) = self.channels.get_mut(&channel) else {
            return Routed::Dropped;
        };

        let offered = match (&mut entry.feed, payload) {
            (ChannelFeed::Orders(state), Payload::ExchangeDelta(delta)) => {
                offer(state, delta.nonce, delta, |book, delta| UpdatePayload::OrderBook {
                    book,
                    delta: Some(delta),
                })
            }
            (ChannelFeed::Summaries(state), Payload::SummaryDeltas(deltas)) => {
                offer(state, deltas.nonce, deltas, |board, changed| UpdatePayload::Summaries {
                    board,
                    changed: Some(changed),
                })
            }
            (ChannelFeed::Passthrough, Payload::SummaryLite(deltas)) => {
                Offered::Merged(0, UpdatePayload::SummaryLite(Arc::new(deltas)))
            }
            (ChannelFeed::Passthrough, Payload::Balance(delta)) => {
                Offered::Merged(0, UpdatePayload::Balance(Arc::new(delta)))
            }
            (ChannelFeed::Passthrough, Payload::Order(delta)) => {
                Offered::Merged(0, UpdatePayload::Order(Arc::new(delta)))
            }
            (_, payload) => {
                warn!(%channel, ?payload, "payload does not match channel");
                return Routed::Dropped;
            }
        };

        match offered {
            Offered::Merged(merged, payload) => {
                let nonce = if channel.is_sequenced() { Some(merged) } else { nonce };
                let update = Update {
                    channel: channel.clone(),
                    nonce,
                    payload,
                    resync: false,
                };
                let delivered = entry.broadcast(update);
                if channel.is_sequenced() {
                    self.publish(&channel);
                }
                Routed::Delivered(delivered)
            }
            Offered::Stale => {
                metrics::inc_stale_deltas();
                Routed::Stale
            }
            Offered::Deferred => Routed::Deferred,
            Offered::Gap {
                expected,
                received,
                epoch,
            } => {
                warn!(%channel, expected, received, "sequence gap detected");
                metrics::inc_sequence_gaps(&channel.to_string());
                self.publish(&channel);
                Routed::Gap {
                    channel,
                    expected,
                    received,
                    epoch,
                }
            }
        }
    }

    /// Install a snapshot fetched for `epoch` and broadcast it as a resync.
    pub fn apply_snapshot(&mut self, channel: &Channel, epoch: u64, snapshot: Snapshot) -> SnapshotApplied {
        let Some(entry) = self.channels.get_mut(channel) else {
            return SnapshotApplied::Outdated;
        };

        let (applied, payload) = match (&mut entry.feed, snapshot) {
            (ChannelFeed::Orders(state), Snapshot::OrderBook(book)) => {
                seed(state, epoch, book, |book| UpdatePayload::OrderBook { book, delta: None })
            }
            (ChannelFeed::Summaries(state), Snapshot::Summaries(board)) => {
                seed(state, epoch, board, |board| UpdatePayload::Summaries {
                    board,
                    changed: None,
                })
            }
            _ => {
                warn!(%channel, "snapshot does not match channel");
                return SnapshotApplied::Outdated;
            }
        };

        if let (SnapshotApplied::Seeded { nonce, replayed }, Some(payload)) = (applied, payload) {
            let delivered = entry.broadcast(Update {
                channel: channel.clone(),
                nonce: Some(nonce),
                payload,
                resync: true,
            });
            info!(%channel, nonce, replayed, delivered, "channel synced");
        }

        self.publish(channel);
        applied
    }

    /// Discard a sequenced channel's state ahead of a new snapshot.
    ///
    /// Subscribers that had seen state receive a `ResyncRequired` marker.
    /// Returns the epoch the snapshot request must carry.
    pub fn reset(&mut self, channel: &Channel) -> Option<u64> {
        let entry = self.channels.get_mut(channel)?;

        let (had_value, epoch) = match &mut entry.feed {
            ChannelFeed::Orders(state) => (state.reset(), state.epoch()),
            ChannelFeed::Summaries(state) => (state.reset(), state.epoch()),
            ChannelFeed::Passthrough => return None,
        };

        if had_value {
            entry.broadcast(Update::resync_required(channel.clone()));
        }
        self.publish(channel);
        Some(epoch)
    }

    /// Whether `channel` is still waiting for a snapshot tagged `epoch`.
    pub fn expects_snapshot(&self, channel: &Channel, epoch: u64) -> bool {
        match self.channels.get(channel).map(|entry| &entry.feed) {
            Some(ChannelFeed::Orders(state)) => !state.is_live() && state.epoch() == epoch,
            Some(ChannelFeed::Summaries(state)) => !state.is_live() && state.epoch() == epoch,
            _ => false,
        }
    }

    /// Drop a channel, ending every handle on it with `error`.
    pub fn fail(&mut self, channel: &Channel, error: SubscriptionError) {
        let Some(entry) = self.channels.remove(channel) else {
            return;
        };

        for subscriber in &entry.subscribers {
            subscriber.close_with(error.clone());
        }
        self.handles.retain(|_, c| c != channel);
        self.views.remove(channel);
        metrics::set_active_subscriptions(self.handles.len());
        warn!(%channel, %error, "channel failed");
    }

    /// End every handle and forget every channel.
    pub fn close_all(&mut self) {
        for entry in self.channels.values() {
            for subscriber in &entry.subscribers {
                subscriber.close();
            }
        }
        self.channels.clear();
        self.handles.clear();
        self.views.clear();
        metrics::set_active_subscriptions(0);
    }

    /// Every registered channel.
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.channels.keys().cloned().collect();
        channels.sort();
        channels
    }

    /// Whether `channel` has subscribers.
    pub fn contains(&self, channel: &Channel) -> bool {
        self.channels.contains_key(channel)
    }

    /// Number of live handles on `channel`.
    pub fn subscriber_count(&self, channel: &Channel) -> usize {
        self.channels.get(channel).map_or(0, |entry| entry.refs)
    }

    fn publish(&self, channel: &Channel) {
        if let Some(entry) = self.channels.get(channel) {
            self.views.insert(channel.clone(), entry.view());
        }
    }
}
