//! Utility functions.

use tracing::{info, warn};

/// Resolve on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}

/// Shorten a market symbol list for log lines.
pub fn summarize_markets(markets: &[String], limit: usize) -> String {
    if markets.len() <= limit {
        return markets.join(",");
    }
    format!("{},... (+{})", markets[..limit].join(","), markets.len() - limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarizes_long_lists() {
        let markets: Vec<String> = ["BTC-ETH", "BTC-LTC", "BTC-XRP"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        assert_eq!(summarize_markets(&markets, 5), "BTC-ETH,BTC-LTC,BTC-XRP");
        assert_eq!(summarize_markets(&markets, 1), "BTC-ETH,... (+2)");
    }
}
