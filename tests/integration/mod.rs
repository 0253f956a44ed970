//! Integration tests for the stream client.
//!
//! These drive a full [`StreamClient`] against the in-memory connector and
//! snapshot source, so no network access is needed.
//! Run with: cargo test --test integration

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use bittrex_feed::error::{AuthenticationError, SnapshotError, SubscriptionError};
use bittrex_feed::orderbook::types::{OrderBookLevel, OrderBookState};
use bittrex_feed::protocol::codec::encode_payload;
use bittrex_feed::stream::{
    Channel, ConnectionState, ReconnectConfig, StreamClient, StreamSettings, SubscriptionHandle,
    Update,
};
use bittrex_feed::transport::{
    Connector, Credentials, Inbound, MockConnector, MockSession, MockSnapshotSource, Snapshot,
    SnapshotSource,
};

const MARKET: &str = "BTC-ETH";
const WAIT: Duration = Duration::from_secs(5);

fn settings() -> StreamSettings {
    StreamSettings {
        buffer_capacity: 64,
        idle_timeout: Duration::from_secs(60),
        heartbeat_interval: Duration::from_secs(60),
        connect_timeout: Duration::from_secs(5),
        snapshot_timeout: Duration::from_secs(5),
        snapshot_retry_delay: Duration::from_millis(10),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
            jitter_factor: 0.0,
        },
        ..StreamSettings::default()
    }
}

struct Fixture {
    client: StreamClient,
    connector: Arc<MockConnector>,
    snapshots: Arc<MockSnapshotSource>,
    sessions: mpsc::UnboundedReceiver<MockSession>,
}

impl Fixture {
    fn new(settings: StreamSettings, credentials: Option<Credentials>) -> Self {
        let (connector, sessions) = MockConnector::new();
        let connector = Arc::new(connector);
        let snapshots = Arc::new(MockSnapshotSource::new());

        let dyn_connector: Arc<dyn Connector> = connector.clone();
        let dyn_snapshots: Arc<dyn SnapshotSource> = snapshots.clone();
        let client = StreamClient::with_parts(settings, dyn_connector, dyn_snapshots, credentials);

        Self {
            client,
            connector,
            snapshots,
            sessions,
        }
    }

    async fn session(&mut self) -> MockSession {
        within(self.sessions.recv()).await.expect("connector dropped")
    }

    fn script_book(&self, nonce: u64, bid: rust_decimal::Decimal) {
        self.snapshots
            .push(Channel::market(MARKET), Ok(Snapshot::OrderBook(book(nonce, bid))));
    }
}

fn book(nonce: u64, bid: rust_decimal::Decimal) -> OrderBookState {
    let mut book = OrderBookState::empty(MARKET, nonce);
    book.buys.push(OrderBookLevel::new(bid, dec!(1)));
    book.sells.push(OrderBookLevel::new(dec!(0.06), dec!(2)));
    book
}

fn exchange_delta(nonce: u64, rate: f64, quantity: f64) -> Value {
    json!({
        "M": MARKET,
        "N": nonce,
        "Z": [{"TY": 0, "R": rate, "Q": quantity}],
        "S": [],
        "f": []
    })
}

async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future).await.expect("timed out")
}

async fn next(handle: &mut SubscriptionHandle) -> Update {
    within(handle.recv())
        .await
        .expect("subscription failed")
        .expect("subscription ended")
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
}

#[tokio::test]
async fn handles_on_one_market_share_a_single_subscription() {
    let mut fx = Fixture::new(settings(), None);

    let mut first = fx.client.subscribe(Channel::market(MARKET)).unwrap();
    let mut second = fx.client.subscribe(Channel::market(MARKET)).unwrap();

    let mut session = fx.session().await;
    let invocation = within(session.next_invocation()).await.unwrap();
    assert_eq!(invocation["M"], "SubscribeToExchangeDeltas");
    assert_eq!(invocation["A"], json!([MARKET]));

    fx.script_book(100, dec!(0.05));

    for handle in [&mut first, &mut second] {
        let update = next(handle).await;
        assert!(update.resync);
        assert_eq!(update.nonce, Some(100));
        assert_eq!(update.order_book().unwrap().best_bid(), Some(dec!(0.05)));
    }

    assert!(session.push_hub("uE", &exchange_delta(101, 0.051, 3.0)));
    for handle in [&mut first, &mut second] {
        let update = next(handle).await;
        assert!(!update.resync);
        assert_eq!(update.nonce, Some(101));
        assert_eq!(update.order_book().unwrap().best_bid(), Some(dec!(0.051)));
    }

    fx.client.unsubscribe(second);
    assert!(session.push_hub("uE", &exchange_delta(102, 0.052, 1.0)));

    let update = next(&mut first).await;
    assert_eq!(update.nonce, Some(102));

    assert!(session.sent_invocations().is_empty());
    assert_eq!(fx.snapshots.request_count(&Channel::market(MARKET)), 1);
    assert_eq!(fx.connector.connects(), 1);
}

#[tokio::test]
async fn nonce_gap_triggers_exactly_one_resync() {
    let mut fx = Fixture::new(settings(), None);
    let channel = Channel::market(MARKET);

    let mut handle = fx.client.subscribe(channel.clone()).unwrap();
    let session = fx.session().await;
    fx.script_book(100, dec!(0.05));
    assert_eq!(next(&mut handle).await.nonce, Some(100));

    assert!(session.push_hub("uE", &exchange_delta(101, 0.051, 1.0)));
    assert_eq!(next(&mut handle).await.nonce, Some(101));

    // 102 is missing
    assert!(session.push_hub("uE", &exchange_delta(103, 0.053, 1.0)));
    assert!(session.push_hub("uE", &exchange_delta(104, 0.054, 1.0)));
    assert!(session.push_hub("uE", &exchange_delta(105, 0.055, 1.0)));

    let snapshots = Arc::clone(&fx.snapshots);
    let gap_channel = channel.clone();
    eventually(move || snapshots.request_count(&gap_channel) == 2).await;

    fx.script_book(105, dec!(0.055));

    let resynced = next(&mut handle).await;
    assert!(resynced.resync);
    assert_eq!(resynced.nonce, Some(105));
    assert_eq!(resynced.order_book().unwrap().best_bid(), Some(dec!(0.055)));

    assert!(session.push_hub("uE", &exchange_delta(106, 0.056, 1.0)));
    let live = next(&mut handle).await;
    assert!(!live.resync);
    assert_eq!(live.nonce, Some(106));

    assert_eq!(fx.snapshots.request_count(&channel), 2);
}

#[tokio::test]
async fn reconnect_replays_subscriptions_and_resyncs() {
    let mut fx = Fixture::new(settings(), None);

    let mut handle = fx.client.subscribe(Channel::market(MARKET)).unwrap();
    let mut session = fx.session().await;
    within(session.next_invocation()).await.unwrap();
    fx.script_book(100, dec!(0.05));
    assert_eq!(next(&mut handle).await.nonce, Some(100));

    session.hang_up();

    let mut session = fx.session().await;
    let replayed = within(session.next_invocation()).await.unwrap();
    assert_eq!(replayed["M"], "SubscribeToExchangeDeltas");
    assert_eq!(replayed["A"], json!([MARKET]));

    let marker = next(&mut handle).await;
    assert!(marker.is_resync_marker());

    fx.script_book(200, dec!(0.07));
    let resynced = next(&mut handle).await;
    assert!(resynced.resync);
    assert_eq!(resynced.nonce, Some(200));

    let mut state = fx.client.watch_state();
    within(state.wait_for(|s| *s == ConnectionState::Connected))
        .await
        .unwrap();
    assert_eq!(fx.connector.connects(), 2);
}

#[tokio::test]
async fn failed_connects_are_retried() {
    let mut fx = Fixture::new(settings(), None);
    fx.connector.fail_next(2);

    let mut handle = fx.client.subscribe(Channel::MarketSummaries).unwrap();
    let mut session = fx.session().await;

    let invocation = within(session.next_invocation()).await.unwrap();
    assert_eq!(invocation["M"], "SubscribeToSummaryDeltas");
    assert_eq!(fx.connector.connects(), 3);

    fx.snapshots.push(
        Channel::MarketSummaries,
        Ok(Snapshot::Summaries(bittrex_feed::market::SummaryBoard::new(7, Vec::new()))),
    );
    let update = next(&mut handle).await;
    assert_eq!(update.nonce, Some(7));
    assert!(update.summaries().unwrap().is_empty());
}

#[tokio::test]
async fn slow_consumer_sees_resync_marker_first() {
    let mut fx = Fixture::new(
        StreamSettings {
            buffer_capacity: 2,
            ..settings()
        },
        None,
    );

    let mut handle = fx.client.subscribe(Channel::market(MARKET)).unwrap();
    let session = fx.session().await;
    fx.script_book(100, dec!(0.05));
    assert_eq!(next(&mut handle).await.nonce, Some(100));

    for nonce in 101..=105 {
        assert!(session.push_hub("uE", &exchange_delta(nonce, 0.05, nonce as f64)));
    }
    let client = &fx.client;
    eventually(|| client.order_book(MARKET).map(|b| b.nonce) == Some(105)).await;

    assert!(next(&mut handle).await.is_resync_marker());
    assert_eq!(next(&mut handle).await.nonce, Some(104));
    assert_eq!(next(&mut handle).await.nonce, Some(105));
}

#[tokio::test]
async fn shutdown_ends_every_handle() {
    let mut fx = Fixture::new(settings(), None);

    let mut handle = fx.client.subscribe(Channel::market(MARKET)).unwrap();
    let _session = fx.session().await;
    fx.script_book(100, dec!(0.05));
    assert_eq!(next(&mut handle).await.nonce, Some(100));

    let state = fx.client.watch_state();
    within(fx.client.shutdown()).await;

    assert_eq!(within(handle.recv()).await, Ok(None));
    assert_eq!(*state.borrow(), ConnectionState::Closed);
}

#[tokio::test]
async fn rejected_authentication_is_terminal_for_account_only() {
    let credentials = Credentials::new("key", "secret");
    let expected_signature = credentials.sign("challenge");
    let mut fx = Fixture::new(settings(), Some(credentials));

    let mut market = fx.client.subscribe(Channel::market(MARKET)).unwrap();
    let mut account = fx.client.subscribe(Channel::AccountUpdates).unwrap();

    let mut session = fx.session().await;
    let mut auth_context = None;
    for _ in 0..2 {
        let invocation = within(session.next_invocation()).await.unwrap();
        if invocation["M"] == "GetAuthContext" {
            auth_context = Some(invocation);
        }
    }
    let auth_context = auth_context.expect("no GetAuthContext sent");
    assert_eq!(auth_context["A"], json!(["key"]));

    let id = auth_context["I"].as_u64().unwrap();
    assert!(session.respond(id, json!("challenge")));

    let authenticate = within(session.next_invocation()).await.unwrap();
    assert_eq!(authenticate["M"], "Authenticate");
    assert_eq!(authenticate["A"], json!(["key", expected_signature]));

    let id = authenticate["I"].as_u64().unwrap();
    assert!(session.respond_error(id, "INVALID_SIGNATURE"));

    let error = within(account.recv()).await.unwrap_err();
    assert_eq!(
        error,
        SubscriptionError::Authentication(AuthenticationError::Rejected(
            "INVALID_SIGNATURE".to_string()
        ))
    );

    fx.script_book(100, dec!(0.05));
    assert_eq!(next(&mut market).await.nonce, Some(100));
    assert!(session.push_hub("uE", &exchange_delta(101, 0.051, 1.0)));
    assert_eq!(next(&mut market).await.nonce, Some(101));
}

#[tokio::test]
async fn account_feed_without_credentials_fails_immediately() {
    let fx = Fixture::new(settings(), None);

    let mut account = fx.client.subscribe(Channel::AccountUpdates).unwrap();

    let error = within(account.recv()).await.unwrap_err();
    assert_eq!(
        error,
        SubscriptionError::Authentication(AuthenticationError::MissingCredentials)
    );
}

#[tokio::test]
async fn account_deltas_pass_through() {
    let credentials = Credentials::new("key", "secret");
    let mut fx = Fixture::new(settings(), Some(credentials));

    let mut account = fx.client.subscribe(Channel::AccountUpdates).unwrap();
    let session = fx.session().await;

    let balance = json!({
        "N": 4,
        "d": {"U": "uuid-1", "W": 1, "c": "BTC", "b": 1.5, "a": 1.25, "z": 0.25, "p": null, "r": false, "u": 1535891234000i64, "h": null}
    });
    assert!(session.push_hub("uB", &balance));

    let update = next(&mut account).await;
    assert_eq!(update.channel, Channel::AccountUpdates);
    assert_eq!(update.nonce, Some(4));
    assert!(!update.resync);
}

#[tokio::test]
async fn shutdown_right_after_subscribe_ends_the_handle() {
    for _ in 0..40 {
        let fx = Fixture::new(settings(), None);

        let mut handle = fx.client.subscribe(Channel::market(MARKET)).unwrap();
        within(fx.client.shutdown()).await;

        assert_eq!(within(handle.recv()).await, Ok(None));
    }
}

#[tokio::test]
async fn idle_connection_is_replaced() {
    let mut fx = Fixture::new(
        StreamSettings {
            idle_timeout: Duration::from_millis(100),
            ..settings()
        },
        None,
    );

    let _handle = fx.client.subscribe(Channel::MarketSummaries).unwrap();
    let _silent = fx.session().await;

    let mut replacement = fx.session().await;
    let invocation = within(replacement.next_invocation()).await.unwrap();
    assert_eq!(invocation["M"], "SubscribeToSummaryDeltas");
    assert_eq!(fx.connector.connects(), 2);
}

#[tokio::test]
async fn repeated_bad_frames_force_a_reconnect() {
    let mut fx = Fixture::new(
        StreamSettings {
            protocol_error_threshold: 3,
            ..settings()
        },
        None,
    );

    let mut handle = fx.client.subscribe(Channel::market(MARKET)).unwrap();
    let session = fx.session().await;
    fx.script_book(100, dec!(0.05));
    assert_eq!(next(&mut handle).await.nonce, Some(100));

    // below the threshold, a good frame resets the count
    assert!(session.push(Inbound::Text("not json".to_string())));
    assert!(session.push(Inbound::Text("not json".to_string())));
    assert!(session.push_hub("uE", &exchange_delta(101, 0.051, 1.0)));
    assert_eq!(next(&mut handle).await.nonce, Some(101));
    assert_eq!(fx.connector.connects(), 1);

    for _ in 0..3 {
        assert!(session.push(Inbound::Text("not json".to_string())));
    }

    let _replacement = fx.session().await;
    assert_eq!(fx.connector.connects(), 2);
    assert!(next(&mut handle).await.is_resync_marker());
}

#[tokio::test]
async fn bad_message_does_not_hide_the_rest_of_the_frame() {
    let mut fx = Fixture::new(settings(), None);

    let mut handle = fx.client.subscribe(Channel::market(MARKET)).unwrap();
    let session = fx.session().await;
    fx.script_book(100, dec!(0.05));
    assert_eq!(next(&mut handle).await.nonce, Some(100));

    let good = encode_payload(&exchange_delta(101, 0.051, 1.0)).unwrap();
    let frame = json!({
        "C": "d-mock,1|A,0",
        "M": [
            { "H": "C2", "M": "uE", "A": ["%%% not base64 %%%"] },
            { "H": "C2", "M": "uE", "A": [good] }
        ]
    });
    assert!(session.push(Inbound::Text(frame.to_string())));

    let update = next(&mut handle).await;
    assert_eq!(update.nonce, Some(101));
    assert_eq!(update.order_book().unwrap().best_bid(), Some(dec!(0.051)));
    assert_eq!(fx.connector.connects(), 1);
}

#[tokio::test]
async fn failed_snapshot_fetch_is_retried() {
    let mut fx = Fixture::new(settings(), None);
    let channel = Channel::market(MARKET);

    let mut handle = fx.client.subscribe(channel.clone()).unwrap();
    let _session = fx.session().await;

    fx.snapshots
        .push(channel.clone(), Err(SnapshotError::Timeout(Duration::from_millis(1))));
    fx.script_book(100, dec!(0.05));

    let update = next(&mut handle).await;
    assert!(update.resync);
    assert_eq!(update.nonce, Some(100));
    assert_eq!(fx.snapshots.request_count(&channel), 2);
}
