//! Connection supervisor: the single reader task.
//!
//! Owns the connection, the channel registry and every sequenced state.
//! Callers reach it only through the command queue; snapshot fetches run as
//! spawned tasks and post their results back on a second queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use strum::Display;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::channel::Channel;
use super::fanout::{HandleId, Subscriber};
use super::multiplexer::{ChannelMultiplexer, Routed, SharedViews, SnapshotApplied};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::config::Config;
use crate::error::{AuthenticationError, ProtocolError, SnapshotError, TransportError};
use crate::metrics;
use crate::protocol::envelope::Envelope;
use crate::protocol::frames::{methods, HubFrame, Invocation};
use crate::transport::{
    Connection, Connector, Credentials, Inbound, Outbound, OutboundSink, Snapshot, SnapshotSource,
};

/// Requests from callers to the reader task.
pub(crate) enum Command {
    /// Connect even without subscriptions.
    Start,
    /// Register a handle on a channel.
    Subscribe {
        id: HandleId,
        channel: Channel,
        subscriber: Subscriber,
    },
    /// Release a handle.
    Unsubscribe { id: HandleId },
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not started yet.
    Disconnected,
    /// Connect attempt in flight.
    Connecting,
    /// Connection open and subscriptions replayed.
    Connected,
    /// Waiting out the backoff delay.
    Reconnecting,
    /// Shut down; terminal.
    Closed,
}

/// Tunables of the reader task.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Hub name used in invocations.
    pub hub: String,
    /// Per-handle buffer bound.
    pub buffer_capacity: usize,
    /// Tear the connection down after this long without any frame.
    pub idle_timeout: Duration,
    /// Ping interval.
    pub heartbeat_interval: Duration,
    /// Bound on one connect attempt, handshake included.
    pub connect_timeout: Duration,
    /// Bound on one snapshot fetch.
    pub snapshot_timeout: Duration,
    /// Wait before retrying a failed snapshot fetch.
    pub snapshot_retry_delay: Duration,
    /// Deltas held per channel while a snapshot is outstanding.
    pub pending_delta_limit: usize,
    /// Consecutive undecodable frames tolerated before reconnecting.
    pub protocol_error_threshold: u32,
    /// Backoff between connect attempts.
    pub reconnect: ReconnectConfig,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            hub: "c2".to_string(),
            buffer_capacity: 1024,
            idle_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(15),
            snapshot_timeout: Duration::from_secs(10),
            snapshot_retry_delay: Duration::from_secs(2),
            pending_delta_limit: 4096,
            protocol_error_threshold: 10,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl StreamSettings {
    /// Build from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            hub: config.bittrex_socket_hub.clone(),
            buffer_capacity: config.handle_buffer_capacity,
            idle_timeout: Duration::from_millis(config.ws_idle_timeout_ms),
            heartbeat_interval: Duration::from_millis(config.ws_heartbeat_interval_ms),
            connect_timeout: Duration::from_millis(config.ws_connect_timeout_ms),
            snapshot_timeout: Duration::from_millis(config.snapshot_timeout_ms),
            snapshot_retry_delay: Duration::from_millis(config.snapshot_retry_delay_ms),
            pending_delta_limit: config.pending_delta_limit,
            protocol_error_threshold: config.protocol_error_threshold,
            reconnect: ReconnectConfig::from_config(config),
        }
    }
}

struct SnapshotReply {
    channel: Channel,
    epoch: u64,
    result: Result<Snapshot, SnapshotError>,
}

/// Invocation awaiting its response.
#[derive(Debug)]
enum PendingCall {
    Subscribe(Channel),
    AuthContext,
    Authenticate,
}

/// Per-connection state.
struct Session {
    sink: OutboundSink,
    pending: HashMap<u64, PendingCall>,
    protocol_errors: u32,
}

enum SessionEnd {
    Shutdown,
    Failed(TransportError),
}

/// Runs the connection state machine.
pub struct ConnectionSupervisor {
    settings: StreamSettings,
    connector: Arc<dyn Connector>,
    snapshots: Arc<dyn SnapshotSource>,
    credentials: Option<Credentials>,
    mux: ChannelMultiplexer,
    views: SharedViews,
    commands: mpsc::UnboundedReceiver<Command>,
    replies_tx: mpsc::UnboundedSender<SnapshotReply>,
    replies_rx: mpsc::UnboundedReceiver<SnapshotReply>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    policy: ReconnectPolicy,
    started: bool,
    next_invocation: u64,
}

impl ConnectionSupervisor {
    /// Create a supervisor reading `commands` until `cancel` fires.
    pub(crate) fn new(
        settings: StreamSettings,
        connector: Arc<dyn Connector>,
        snapshots: Arc<dyn SnapshotSource>,
        credentials: Option<Credentials>,
        commands: mpsc::UnboundedReceiver<Command>,
        cancel: CancellationToken,
    ) -> Self {
        let views: SharedViews = Arc::new(DashMap::new());
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            mux: ChannelMultiplexer::new(Arc::clone(&views), settings.pending_delta_limit),
            policy: ReconnectPolicy::new(settings.reconnect.clone()),
            settings,
            connector,
            snapshots,
            credentials,
            views,
            commands,
            replies_tx,
            replies_rx,
            state,
            cancel,
            started: false,
            next_invocation: 0,
        }
    }

    /// Channel views published by this supervisor.
    pub fn views(&self) -> SharedViews {
        Arc::clone(&self.views)
    }

    /// Receiver of connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Run until cancelled.
    pub async fn run(mut self) {
        debug!("stream supervisor started");

        if self.wait_for_start().await {
            self.supervise().await;
        }

        self.mux.close_all();
        self.close_queued();
        self.set_state(ConnectionState::Closed);
        info!("stream supervisor stopped");
    }

    /// End handles whose subscribe never reached the registry.
    fn close_queued(&mut self) {
        self.commands.close();

        let mut closed = 0;
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Subscribe { subscriber, .. } = command {
                subscriber.close();
                closed += 1;
            }
        }
        if closed > 0 {
            debug!(closed, "closed subscriptions queued at shutdown");
        }
    }

    async fn supervise(&mut self) {
        loop {
            self.set_state(ConnectionState::Connecting);

            match self.connect().await {
                None => return,
                Some(Ok(connection)) => {
                    self.policy.reset();
                    match self.run_session(connection).await {
                        SessionEnd::Shutdown => return,
                        SessionEnd::Failed(e) => warn!(error = %e, "connection lost"),
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, attempt = self.policy.attempts(), "connect failed");
                }
            }

            self.set_state(ConnectionState::Reconnecting);
            metrics::inc_reconnects();

            let delay = self.policy.next_delay();
            info!(
                delay_ms = delay.as_millis() as u64,
                attempt = self.policy.attempts(),
                "Reconnecting after delay"
            );
            if !self.backoff(delay).await {
                return;
            }
        }
    }

    /// Process commands until something asks for a connection.
    async fn wait_for_start(&mut self) -> bool {
        let cancel = self.cancel.clone();

        while !self.started {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                command = self.commands.recv() => match command {
                    Some(command) => {
                        self.handle_command(command);
                    }
                    None => return false,
                },
            }
        }
        true
    }

    /// One connect attempt, bounded by the connect timeout. `None` on shutdown.
    async fn connect(&mut self) -> Option<Result<Connection, TransportError>> {
        let cancel = self.cancel.clone();
        let connector = Arc::clone(&self.connector);
        let timeout = self.settings.connect_timeout;

        let attempt = async move {
            match tokio::time::timeout(timeout, connector.connect()).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::ConnectTimeout(timeout)),
            }
        };
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                result = &mut attempt => return Some(result),
                command = self.commands.recv() => match command {
                    Some(command) => {
                        self.handle_command(command);
                    }
                    None => return None,
                },
                Some(reply) = self.replies_rx.recv() => self.handle_snapshot(reply),
            }
        }
    }

    /// Sleep out the backoff delay. `false` on shutdown.
    async fn backoff(&mut self, delay: Duration) -> bool {
        let cancel = self.cancel.clone();
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(command) => {
                        self.handle_command(command);
                    }
                    None => return false,
                },
                Some(reply) = self.replies_rx.recv() => self.handle_snapshot(reply),
            }
        }
    }

    async fn run_session(&mut self, connection: Connection) -> SessionEnd {
        let Connection { sink, mut stream } = connection;
        let mut session = Session {
            sink,
            pending: HashMap::new(),
            protocol_errors: 0,
        };

        self.set_state(ConnectionState::Connected);

        let channels = self.mux.channels();
        info!(channels = channels.len(), "connected, replaying subscriptions");
        for channel in &channels {
            if let Err(e) = self.activate(&mut session, channel).await {
                return SessionEnd::Failed(e);
            }
        }

        let cancel = self.cancel.clone();
        let idle_timeout = self.settings.idle_timeout;
        let idle = tokio::time::sleep(idle_timeout);
        tokio::pin!(idle);

        let period = self.settings.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = session.sink.close().await {
                        debug!(error = %e, "close on shutdown failed");
                    }
                    return SessionEnd::Shutdown;
                }
                _ = &mut idle => {
                    return SessionEnd::Failed(TransportError::IdleTimeout(idle_timeout));
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = session.sink.send(Outbound::Ping).await {
                        return SessionEnd::Failed(e);
                    }
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return SessionEnd::Shutdown;
                    };
                    if let Some(channel) = self.handle_command(command) {
                        if let Err(e) = self.activate(&mut session, &channel).await {
                            return SessionEnd::Failed(e);
                        }
                    }
                }
                Some(reply) = self.replies_rx.recv() => self.handle_snapshot(reply),
                frame = stream.next() => {
                    idle.as_mut().reset(tokio::time::Instant::now() + idle_timeout);

                    let result = match frame {
                        Some(Ok(Inbound::Text(text))) => self.handle_text(&mut session, &text).await,
                        Some(Ok(Inbound::Heartbeat)) => {
                            trace!("heartbeat");
                            Ok(())
                        }
                        Some(Ok(Inbound::Closed { code, reason })) => {
                            Err(TransportError::ConnectionClosed { code, reason })
                        }
                        Some(Err(e)) => Err(e),
                        None => Err(TransportError::ConnectionClosed {
                            code: None,
                            reason: "stream ended".to_string(),
                        }),
                    };

                    if let Err(e) = result {
                        return SessionEnd::Failed(e);
                    }
                }
            }
        }
    }

    /// Register or release a handle. Returns a channel that is new and has
    /// to be started on the wire.
    fn handle_command(&mut self, command: Command) -> Option<Channel> {
        match command {
            Command::Start => {
                self.started = true;
                None
            }
            Command::Subscribe {
                id,
                channel,
                subscriber,
            } => {
                self.started = true;

                if channel.requires_auth() && self.credentials.is_none() {
                    warn!(%channel, handle = id, "account feed needs credentials");
                    subscriber.close_with(AuthenticationError::MissingCredentials.into());
                    return None;
                }

                self.mux
                    .subscribe(id, channel.clone(), subscriber)
                    .then_some(channel)
            }
            Command::Unsubscribe { id } => {
                if let Some((channel, true)) = self.mux.unsubscribe(id) {
                    debug!(%channel, "hub has no unsubscribe call; further frames are dropped");
                }
                None
            }
        }
    }

    /// Start a channel on the current connection.
    async fn activate(&mut self, session: &mut Session, channel: &Channel) -> Result<(), TransportError> {
        match channel.subscribe_call() {
            Some((method, args)) => {
                self.invoke(session, method, args, PendingCall::Subscribe(channel.clone()))
                    .await?;
            }
            None => {
                let Some(api_key) = self.credentials.as_ref().map(|c| c.api_key.clone()) else {
                    self.fail_account(AuthenticationError::MissingCredentials);
                    return Ok(());
                };
                self.invoke(session, methods::GET_AUTH_CONTEXT, vec![api_key], PendingCall::AuthContext)
                    .await?;
            }
        }

        if let Some(epoch) = self.mux.reset(channel) {
            self.request_snapshot(channel.clone(), epoch, Duration::ZERO);
        }
        Ok(())
    }

    async fn invoke(
        &mut self,
        session: &mut Session,
        method: &str,
        args: Vec<String>,
        call: PendingCall,
    ) -> Result<(), TransportError> {
        self.next_invocation += 1;
        let id = self.next_invocation;

        let text = Invocation::new(&self.settings.hub, method, args, id)
            .to_json()
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        debug!(id, method, "invoking hub method");
        session.sink.send(Outbound::Text(text)).await?;
        session.pending.insert(id, call);
        Ok(())
    }

    async fn handle_text(&mut self, session: &mut Session, text: &str) -> Result<(), TransportError> {
        let _timer = metrics::timer_frame();
        metrics::inc_frames_received();

        let frame = match HubFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => return self.protocol_error(session, e),
        };

        match frame {
            HubFrame::KeepAlive => {}
            HubFrame::Response { id, result, error } => {
                self.handle_response(session, id, result, error).await?;
            }
            HubFrame::Messages(messages) => {
                let mut failed = false;
                for message in &messages {
                    match Envelope::decode(message) {
                        Ok(envelopes) => {
                            for envelope in envelopes {
                                self.route(envelope);
                            }
                        }
                        Err(e) => {
                            failed = true;
                            self.protocol_error(session, e)?;
                        }
                    }
                }
                if failed {
                    return Ok(());
                }
            }
        }

        session.protocol_errors = 0;
        Ok(())
    }

    fn protocol_error(&mut self, session: &mut Session, error: ProtocolError) -> Result<(), TransportError> {
        metrics::inc_protocol_errors();
        session.protocol_errors += 1;
        warn!(error = %error, consecutive = session.protocol_errors, "dropping undecodable frame");

        if session.protocol_errors >= self.settings.protocol_error_threshold {
            return Err(TransportError::ProtocolErrors(session.protocol_errors));
        }
        Ok(())
    }

    fn route(&mut self, envelope: Envelope) {
        if let Routed::Gap { channel, epoch, .. } = self.mux.route(envelope) {
            self.request_snapshot(channel, epoch, Duration::ZERO);
        }
    }

    async fn handle_response(
        &mut self,
        session: &mut Session,
        id: u64,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), TransportError> {
        let Some(call) = session.pending.remove(&id) else {
            trace!(id, "response to unknown invocation");
            return Ok(());
        };

        match call {
            PendingCall::Subscribe(channel) => match error {
                Some(error) => warn!(%channel, %error, "hub rejected subscription"),
                None => debug!(%channel, "subscribed on hub"),
            },
            PendingCall::AuthContext => {
                let challenge = match (error, result) {
                    (Some(error), _) => {
                        self.fail_account(AuthenticationError::Rejected(error));
                        return Ok(());
                    }
                    (None, Some(Value::String(challenge))) => challenge,
                    (None, _) => {
                        self.fail_account(AuthenticationError::InvalidChallenge);
                        return Ok(());
                    }
                };

                let Some(credentials) = self.credentials.as_ref() else {
                    self.fail_account(AuthenticationError::MissingCredentials);
                    return Ok(());
                };
                let args = vec![credentials.api_key.clone(), credentials.sign(&challenge)];

                self.invoke(session, methods::AUTHENTICATE, args, PendingCall::Authenticate)
                    .await?;
            }
            PendingCall::Authenticate => match (error, result) {
                (None, Some(Value::Bool(true))) => info!("account feed authenticated"),
                (Some(error), _) => self.fail_account(AuthenticationError::Rejected(error)),
                (None, other) => self.fail_account(AuthenticationError::Rejected(format!(
                    "authenticate returned {}",
                    other.unwrap_or(Value::Null)
                ))),
            },
        }
        Ok(())
    }

    fn fail_account(&mut self, error: AuthenticationError) {
        self.mux.fail(&Channel::AccountUpdates, error.into());
    }

    fn handle_snapshot(&mut self, reply: SnapshotReply) {
        let SnapshotReply {
            channel,
            epoch,
            result,
        } = reply;

        match result {
            Ok(snapshot) => match self.mux.apply_snapshot(&channel, epoch, snapshot) {
                SnapshotApplied::Seeded { .. } => {}
                SnapshotApplied::Gap { epoch } => {
                    self.request_snapshot(channel, epoch, Duration::ZERO);
                }
                SnapshotApplied::Outdated => {
                    debug!(%channel, epoch, "discarding outdated snapshot");
                }
            },
            Err(e) => {
                metrics::inc_snapshot_failures(&channel.to_string());
                if self.mux.expects_snapshot(&channel, epoch) {
                    warn!(%channel, error = %e, "snapshot fetch failed, retrying");
                    let delay = self.settings.snapshot_retry_delay;
                    self.request_snapshot(channel, epoch, delay);
                } else {
                    debug!(%channel, error = %e, "outdated snapshot fetch failed");
                }
            }
        }
    }

    /// Fetch a snapshot on a separate task; the reply is tagged with `epoch`.
    fn request_snapshot(&self, channel: Channel, epoch: u64, delay: Duration) {
        let source = Arc::clone(&self.snapshots);
        let replies = self.replies_tx.clone();
        let token = self.cancel.child_token();
        let timeout = self.settings.snapshot_timeout;

        debug!(%channel, epoch, "requesting snapshot");

        tokio::spawn(async move {
            let target = channel.clone();
            let fetch = async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let start = Instant::now();
                let result = match tokio::time::timeout(timeout, source.fetch_snapshot(&target)).await {
                    Ok(result) => result,
                    Err(_) => Err(SnapshotError::Timeout(timeout)),
                };
                metrics::record_snapshot_latency(start, &target.to_string());
                result
            };

            tokio::select! {
                _ = token.cancelled() => {}
                result = fetch => {
                    let reply = SnapshotReply { channel, epoch, result };
                    if replies.send(reply).is_err() {
                        trace!("supervisor gone, dropping snapshot");
                    }
                }
            }
        });
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "connection state changed");
        }
    }
}
