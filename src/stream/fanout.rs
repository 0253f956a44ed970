//! Per-handle bounded buffers and the caller-side subscription handle.
//!
//! The reader task pushes into each subscriber's buffer without ever waiting.
//! When a buffer is full the oldest update is dropped and the handle is marked
//! lagged; the consumer then sees a `ResyncRequired` marker before the rest.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace};

use super::channel::Channel;
use super::supervisor::Command;
use super::update::Update;
use crate::error::SubscriptionError;
use crate::metrics;

/// Identifies one subscription handle.
pub type HandleId = u64;

/// Outcome of pushing an update into one subscriber's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Buffered.
    Delivered,
    /// Buffered after dropping the oldest update.
    Lagged,
    /// The handle is gone or closed; the update was discarded.
    Closed,
}

struct Inner {
    buffer: VecDeque<Update>,
    lagged: bool,
    closed: bool,
    terminal: Option<SubscriptionError>,
}

struct Shared {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
}

/// Reader-side end of a subscription.
pub(crate) struct Subscriber {
    id: HandleId,
    shared: Arc<Shared>,
}

impl Subscriber {
    pub(crate) fn id(&self) -> HandleId {
        self.id
    }

    /// Push an update without waiting.
    pub(crate) fn deliver(&self, update: Update) -> Delivery {
        let delivery = {
            let mut inner = self.shared.inner.lock();
            if inner.closed {
                return Delivery::Closed;
            }

            let mut delivery = Delivery::Delivered;
            if inner.buffer.len() >= self.shared.capacity {
                inner.buffer.pop_front();
                inner.lagged = true;
                delivery = Delivery::Lagged;
            }
            inner.buffer.push_back(update);
            delivery
        };

        if delivery == Delivery::Lagged {
            trace!(handle = self.id, "subscriber buffer full, dropped oldest update");
            metrics::inc_slow_consumer_drops();
        }
        self.shared.notify.notify_one();
        delivery
    }

    /// Whether the consumer side has gone away.
    pub(crate) fn is_closed(&self) -> bool {
        self.shared.inner.lock().closed
    }

    /// End the sequence; buffered updates stay readable.
    pub(crate) fn close(&self) {
        self.shared.inner.lock().closed = true;
        self.shared.notify.notify_one();
    }

    /// End the sequence with a terminal error.
    pub(crate) fn close_with(&self, error: SubscriptionError) {
        {
            let mut inner = self.shared.inner.lock();
            inner.closed = true;
            inner.terminal = Some(error);
        }
        self.shared.notify.notify_one();
    }
}

impl Drop for Subscriber {
    /// A handle whose subscriber is gone can never receive again; end it.
    fn drop(&mut self) {
        self.close();
    }
}

/// Caller-side end of a subscription.
///
/// Dropping the handle unsubscribes it.
pub struct SubscriptionHandle {
    id: HandleId,
    channel: Channel,
    shared: Arc<Shared>,
    control: mpsc::UnboundedSender<Command>,
    released: bool,
}

/// Create a connected handle/subscriber pair.
pub(crate) fn subscription(
    id: HandleId,
    channel: Channel,
    capacity: usize,
    control: mpsc::UnboundedSender<Command>,
) -> (SubscriptionHandle, Subscriber) {
    let shared = Arc::new(Shared {
        inner: Mutex::new(Inner {
            buffer: VecDeque::with_capacity(capacity.min(64)),
            lagged: false,
            closed: false,
            terminal: None,
        }),
        notify: Notify::new(),
        capacity: capacity.max(1),
    });

    let handle = SubscriptionHandle {
        id,
        channel,
        shared: Arc::clone(&shared),
        control,
        released: false,
    };

    (handle, Subscriber { id, shared })
}

impl SubscriptionHandle {
    /// Handle id, unique within one client.
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Channel this handle is subscribed to.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Number of updates waiting to be received.
    pub fn buffered(&self) -> usize {
        self.shared.inner.lock().buffer.len()
    }

    /// Wait for the next update.
    ///
    /// Returns `Ok(None)` once the subscription has ended and the buffer is
    /// drained, or the terminal error that ended it.
    pub async fn recv(&mut self) -> Result<Option<Update>, SubscriptionError> {
        loop {
            let notified = self.shared.notify.notified();

            {
                let mut inner = self.shared.inner.lock();
                if inner.lagged {
                    inner.lagged = false;
                    return Ok(Some(Update::resync_required(self.channel.clone())));
                }
                if let Some(update) = inner.buffer.pop_front() {
                    return Ok(Some(update));
                }
                if inner.closed {
                    return match inner.terminal.take() {
                        Some(error) => Err(error),
                        None => Ok(None),
                    };
                }
            }

            notified.await;
        }
    }

    /// Adapt the handle into a stream of updates.
    ///
    /// The stream ends after a terminal error is yielded.
    pub fn into_stream(self) -> impl Stream<Item = Result<Update, SubscriptionError>> {
        let mut handle = self;
        async_stream::stream! {
            loop {
                match handle.recv().await {
                    Ok(Some(update)) => yield Ok(update),
                    Ok(None) => break,
                    Err(error) => {
                        yield Err(error);
                        break;
                    }
                }
            }
        }
    }

    /// Unsubscribe explicitly.
    pub(crate) fn release(mut self) {
        self.send_unsubscribe();
    }

    fn send_unsubscribe(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.shared.inner.lock().closed = true;

        if self.control.send(Command::Unsubscribe { id: self.id }).is_err() {
            debug!(handle = self.id, "client already shut down");
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.send_unsubscribe();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("buffered", &self.buffered())
            .finish()
    }
}
