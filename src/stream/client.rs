//! Public entry point: one connection shared by every subscription.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use super::channel::Channel;
use super::fanout::{subscription, SubscriptionHandle};
use super::multiplexer::{ChannelSnapshot, ChannelView, SharedViews};
use super::supervisor::{Command, ConnectionState, ConnectionSupervisor, StreamSettings};
use crate::config::Config;
use crate::error::{FeedError, Result};
use crate::market::SummaryBoard;
use crate::orderbook::types::OrderBookState;
use crate::transport::{Connector, Credentials, SignalRConnector, SnapshotSource, SocketSnapshotSource};

/// Streaming client for the exchange's public and account feeds.
///
/// Owns a background reader task. Dropping the client, or calling
/// [`StreamClient::shutdown`], cancels it and ends every handle.
pub struct StreamClient {
    control: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    views: SharedViews,
    next_id: AtomicU64,
    buffer_capacity: usize,
    cancel: CancellationToken,
    _guard: DropGuard,
    task: Option<JoinHandle<()>>,
}

impl StreamClient {
    /// Create a client for the configured hub.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(config: &Config) -> Result<Self> {
        let connector: Arc<dyn Connector> = Arc::new(SignalRConnector::from_config(config)?);
        let snapshots: Arc<dyn SnapshotSource> = Arc::new(SocketSnapshotSource::new(
            Arc::clone(&connector),
            config.bittrex_socket_hub.clone(),
        ));

        Ok(Self::with_parts(
            StreamSettings::from_config(config),
            connector,
            snapshots,
            Credentials::from_config(config),
        ))
    }

    /// Create a client from explicit collaborators.
    ///
    /// Must be called within a Tokio runtime.
    pub fn with_parts(
        settings: StreamSettings,
        connector: Arc<dyn Connector>,
        snapshots: Arc<dyn SnapshotSource>,
        credentials: Option<Credentials>,
    ) -> Self {
        let (control, commands) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let buffer_capacity = settings.buffer_capacity.max(1);

        let supervisor = ConnectionSupervisor::new(
            settings,
            connector,
            snapshots,
            credentials,
            commands,
            cancel.clone(),
        );
        let views = supervisor.views();
        let state = supervisor.watch_state();
        let task = tokio::spawn(supervisor.run());

        Self {
            control,
            state,
            views,
            next_id: AtomicU64::new(1),
            buffer_capacity,
            _guard: cancel.clone().drop_guard(),
            cancel,
            task: Some(task),
        }
    }

    /// Connect without waiting for the first subscription.
    pub fn start(&self) -> Result<()> {
        self.send(Command::Start)
    }

    /// Subscribe to a channel.
    ///
    /// Subscribing to a channel that already has handles shares its state;
    /// nothing new is sent to the hub.
    pub fn subscribe(&self, channel: Channel) -> Result<SubscriptionHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (handle, subscriber) =
            subscription(id, channel.clone(), self.buffer_capacity, self.control.clone());

        self.send(Command::Subscribe {
            id,
            channel: channel.clone(),
            subscriber,
        })?;

        debug!(%channel, handle = id, "subscription requested");
        Ok(handle)
    }

    /// Release a handle. Same as dropping it.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        handle.release();
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver of connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Latest order book for a subscribed market, possibly stale while
    /// resyncing.
    pub fn order_book(&self, market: &str) -> Option<Arc<OrderBookState>> {
        let view = self.views.get(&Channel::market(market))?;
        match &view.state {
            Some(ChannelSnapshot::OrderBook(book)) => Some(Arc::clone(book)),
            _ => None,
        }
    }

    /// Latest summary board, if the summary channel is subscribed.
    pub fn summaries(&self) -> Option<Arc<SummaryBoard>> {
        let view = self.views.get(&Channel::MarketSummaries)?;
        match &view.state {
            Some(ChannelSnapshot::Summaries(board)) => Some(Arc::clone(board)),
            _ => None,
        }
    }

    /// Views of every subscribed channel, sorted by channel.
    pub fn channel_views(&self) -> Vec<(Channel, ChannelView)> {
        let mut views: Vec<(Channel, ChannelView)> = self
            .views
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        views.sort_by(|a, b| a.0.cmp(&b.0));
        views
    }

    /// Shared view map, for serving alongside the client.
    pub fn shared_views(&self) -> SharedViews {
        Arc::clone(&self.views)
    }

    /// Stop the reader task and wait for it to finish.
    ///
    /// Every handle ends with `Ok(None)` once drained.
    pub async fn shutdown(mut self) {
        info!("shutting down stream client");
        self.cancel.cancel();

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "reader task ended abnormally");
            }
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.control.send(command).map_err(|_| FeedError::Closed)
    }
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("state", &self.state())
            .field("channels", &self.views.len())
            .finish()
    }
}
