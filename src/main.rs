//! Bittrex public feed streamer entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bittrex_feed::api::{create_router, AppState};
use bittrex_feed::config::Config;
use bittrex_feed::metrics;
use bittrex_feed::orderbook::types::{OrderBookState, Side};
use bittrex_feed::stream::{Channel, StreamClient, SubscriptionHandle, Update, UpdatePayload};
use bittrex_feed::transport::{
    Connector, SignalRConnector, Snapshot, SnapshotSource, SocketSnapshotSource,
};
use bittrex_feed::utils::{shutdown_signal, summarize_markets};

/// Bittrex public data feed streamer.
#[derive(Parser, Debug)]
#[command(name = "bittrex-feed")]
#[command(about = "Stream gap-free order books and market summaries from Bittrex")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream channels and print updates (default).
    Watch {
        /// Market to stream the order book for, e.g. BTC-ETH. Repeatable.
        #[arg(short, long = "market")]
        markets: Vec<String>,

        /// Stream market summaries.
        #[arg(long)]
        summaries: bool,

        /// Stream light market summaries.
        #[arg(long)]
        lite: bool,

        /// Stream balance and order updates (requires API credentials).
        #[arg(long)]
        account: bool,

        /// HTTP server port for health/metrics. Overrides PORT.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Fetch one snapshot and print it.
    Snapshot {
        /// Market to fetch the order book for. Summaries when omitted.
        market: Option<String>,

        /// Number of levels to print per side.
        #[arg(short, long, default_value = "10")]
        depth: usize,
    },

    /// Check configuration validity.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("bittrex_feed=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    // Install the Prometheus recorder before any metric is touched
    let prometheus = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed");
            None
        }
    };
    metrics::init_metrics();

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config().await,
        Some(Command::Snapshot { market, depth }) => cmd_snapshot(market, depth).await,
        Some(Command::Watch {
            markets,
            summaries,
            lite,
            account,
            port,
        }) => cmd_watch(markets, summaries, lite, account, port, prometheus).await,
        None => cmd_watch(Vec::new(), true, false, false, None, prometheus).await,
    }
}

/// Check configuration validity.
async fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("BITTREX FEED - CONFIGURATION CHECK");
    println!("======================================================================");

    // Load configuration
    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    // Validate configuration
    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    // Resolve hub URLs
    print!("Resolving hub URL... ");
    match SignalRConnector::from_config(&config).and_then(|c| c.negotiate_url()) {
        Ok(url) => {
            println!("OK");
            println!("  Negotiate: {}", url);
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Hub URL invalid"));
        }
    }

    // Show configuration summary
    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Hub: {} @ {}", config.bittrex_socket_hub, config.bittrex_socket_url);
    println!(
        "  Credentials: {}",
        if config.has_credentials() { "present" } else { "absent (account feed disabled)" }
    );
    println!("  Handle Buffer: {} updates", config.handle_buffer_capacity);
    println!("  Pending Delta Limit: {}", config.pending_delta_limit);
    println!(
        "  Heartbeat / Idle Timeout: {}ms / {}ms",
        config.ws_heartbeat_interval_ms, config.ws_idle_timeout_ms
    );
    println!(
        "  Reconnect: {}ms -> {}ms (x{}, jitter {})",
        config.ws_reconnect_initial_delay_ms,
        config.ws_reconnect_max_delay_ms,
        config.ws_reconnect_multiplier,
        config.ws_reconnect_jitter
    );
    println!("  Snapshot Timeout: {}ms", config.snapshot_timeout_ms);
    println!("  HTTP Port: {}", config.port);
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Fetch one snapshot over a dedicated connection.
async fn cmd_snapshot(market: Option<String>, depth: usize) -> anyhow::Result<()> {
    let config = Config::load()?;
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    let connector: Arc<dyn Connector> = Arc::new(SignalRConnector::from_config(&config)?);
    let source = SocketSnapshotSource::new(connector, config.bittrex_socket_hub.clone());

    let channel = match market {
        Some(symbol) => Channel::market(symbol),
        None => Channel::MarketSummaries,
    };

    info!(%channel, "fetching snapshot");
    let snapshot = tokio::time::timeout(
        Duration::from_millis(config.snapshot_timeout_ms),
        source.fetch_snapshot(&channel),
    )
    .await
    .context("snapshot timed out")??;

    match snapshot {
        Snapshot::OrderBook(book) => print_book(&book, depth),
        Snapshot::Summaries(board) => {
            println!("Summaries @ nonce {} ({} markets)", board.nonce, board.len());
            for (name, summary) in board.summaries.iter().take(depth) {
                println!(
                    "  {:<12} last={:?} bid={:?} ask={:?} vol={:?}",
                    name, summary.last, summary.bid, summary.ask, summary.base_volume
                );
            }
        }
    }

    Ok(())
}

/// Stream channels until interrupted.
async fn cmd_watch(
    markets: Vec<String>,
    summaries: bool,
    lite: bool,
    account: bool,
    port: Option<u16>,
    prometheus: Option<PrometheusHandle>,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    let mut channels: Vec<Channel> = markets.iter().cloned().map(Channel::market).collect();
    if summaries || (channels.is_empty() && !lite && !account) {
        channels.push(Channel::MarketSummaries);
    }
    if lite {
        channels.push(Channel::SummaryLite);
    }
    if account {
        channels.push(Channel::AccountUpdates);
    }

    info!(
        hub = %config.bittrex_socket_hub,
        markets = %summarize_markets(&markets, 5),
        channels = channels.len(),
        "Starting Bittrex feed"
    );

    let client = StreamClient::new(&config)?;

    // Start HTTP server
    let mut app_state = AppState::new(client.watch_state(), client.shared_views());
    if let Some(handle) = prometheus {
        app_state = app_state.with_metrics(handle);
    }
    let router = create_router(app_state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(config.port)));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
        {
            error!("HTTP server error: {}", e);
        }
    });

    let mut handles = Vec::with_capacity(channels.len());
    for channel in channels {
        handles.push(client.subscribe(channel)?);
    }

    let printer = tokio::spawn(print_updates(handles));

    shutdown_signal().await;
    info!("Shutdown signal received");

    client.shutdown().await;
    if let Err(e) = printer.await {
        warn!(error = %e, "printer task failed");
    }
    server_handle.abort();

    Ok(())
}

/// Print updates from every handle until they all end.
async fn print_updates(handles: Vec<SubscriptionHandle>) {
    let mut merged =
        futures::stream::select_all(handles.into_iter().map(|h| Box::pin(h.into_stream())));

    while let Some(item) = merged.next().await {
        match item {
            Ok(update) => print_update(&update),
            Err(e) => warn!(error = %e, "subscription ended"),
        }
    }
}

fn print_update(update: &Update) {
    let marker = if update.resync { " [resync]" } else { "" };

    match &update.payload {
        UpdatePayload::OrderBook { book, delta } => {
            let fills = delta.as_ref().map(|d| d.fills.len()).unwrap_or(0);
            println!(
                "[{}] nonce={} bid={:?} ask={:?} spread={:?} fills={}{}",
                update.channel,
                book.nonce,
                book.best_bid(),
                book.best_ask(),
                book.spread(),
                fills,
                marker
            );
        }
        UpdatePayload::Summaries { board, changed } => {
            let changed = changed.as_ref().map(|c| c.deltas.len()).unwrap_or(board.len());
            println!(
                "[{}] nonce={} markets={} changed={}{}",
                update.channel,
                board.nonce,
                board.len(),
                changed,
                marker
            );
        }
        UpdatePayload::SummaryLite(lite) => {
            println!("[{}] {} light summaries", update.channel, lite.deltas.len());
        }
        UpdatePayload::Balance(balance) => {
            println!(
                "[{}] {} balance={} available={}",
                update.channel, balance.delta.currency, balance.delta.balance, balance.delta.available
            );
        }
        UpdatePayload::Order(order) => {
            println!(
                "[{}] {} {} {} remaining={}",
                update.channel,
                order.kind,
                order.order.exchange,
                order.order.order_uuid,
                order.order.quantity_remaining
            );
        }
        UpdatePayload::ResyncRequired => {
            println!("[{}] resync required, waiting for snapshot", update.channel);
        }
    }
}

fn print_book(book: &OrderBookState, depth: usize) {
    println!("{} @ nonce {}", book.market, book.nonce);
    println!("{:>20} {:>20}  |  {:>20} {:>20}", "bid qty", "bid", "ask", "ask qty");

    let bids = book.levels(Side::Buy);
    let asks = book.levels(Side::Sell);
    for i in 0..depth.min(bids.len().max(asks.len())) {
        let bid = bids.get(i);
        let ask = asks.get(i);
        println!(
            "{:>20} {:>20}  |  {:>20} {:>20}",
            bid.map(|l| l.quantity.to_string()).unwrap_or_default(),
            bid.map(|l| l.rate.to_string()).unwrap_or_default(),
            ask.map(|l| l.rate.to_string()).unwrap_or_default(),
            ask.map(|l| l.quantity.to_string()).unwrap_or_default(),
        );
    }

    if let (Some(spread), Some(mid)) = (book.spread(), book.mid_price()) {
        println!("spread={} mid={}", spread, mid);
    }
}
