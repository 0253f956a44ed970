//! Application configuration loaded from environment variables.

use serde::Deserialize;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Endpoint ===
    /// SignalR base URL (negotiate and connect are resolved against it).
    #[serde(default = "default_socket_url")]
    pub bittrex_socket_url: String,

    /// Hub name.
    #[serde(default = "default_socket_hub")]
    pub bittrex_socket_hub: String,

    // === Account Credentials ===
    /// API key, required only for the account feed.
    #[serde(default)]
    pub bittrex_api_key: Option<String>,

    /// API secret, required only for the account feed.
    #[serde(default)]
    pub bittrex_api_secret: Option<String>,

    // === Fan-out ===
    /// Per-handle buffer bound before the oldest update is dropped.
    #[serde(default = "default_buffer_capacity")]
    pub handle_buffer_capacity: usize,

    /// Deltas held per channel while a snapshot is outstanding.
    #[serde(default = "default_pending_delta_limit")]
    pub pending_delta_limit: usize,

    // === Connection Supervision ===
    /// Reconnect if no frame arrives for this long.
    #[serde(default = "default_idle_timeout_ms")]
    pub ws_idle_timeout_ms: u64,

    /// Interval between keep-alive pings.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub ws_heartbeat_interval_ms: u64,

    /// Upper bound on a single connect attempt (negotiate + upgrade).
    #[serde(default = "default_connect_timeout_ms")]
    pub ws_connect_timeout_ms: u64,

    /// First reconnect delay.
    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub ws_reconnect_initial_delay_ms: u64,

    /// Reconnect delay cap.
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub ws_reconnect_max_delay_ms: u64,

    /// Backoff multiplier (e.g., 2.0 for exponential).
    #[serde(default = "default_reconnect_multiplier")]
    pub ws_reconnect_multiplier: f64,

    /// Relative jitter applied to each delay, in [0, 1).
    #[serde(default = "default_reconnect_jitter")]
    pub ws_reconnect_jitter: f64,

    /// Consecutive malformed frames tolerated before reconnecting.
    #[serde(default = "default_protocol_error_threshold")]
    pub protocol_error_threshold: u32,

    // === Snapshots ===
    /// Upper bound on a single snapshot fetch.
    #[serde(default = "default_snapshot_timeout_ms")]
    pub snapshot_timeout_ms: u64,

    /// Delay before retrying a failed snapshot fetch.
    #[serde(default = "default_snapshot_retry_delay_ms")]
    pub snapshot_retry_delay_ms: u64,

    /// Timeout for the negotiate HTTP request.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    // === Server Configuration ===
    /// HTTP server port for health/metrics endpoints.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,

    /// Enable verbose logging.
    #[serde(default)]
    pub verbose: bool,
}

fn default_socket_url() -> String {
    "https://socket.bittrex.com/signalr/".to_string()
}

fn default_socket_hub() -> String {
    "c2".to_string()
}

fn default_buffer_capacity() -> usize {
    1024
}

fn default_pending_delta_limit() -> usize {
    4096
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    15_000
}

fn default_reconnect_initial_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

fn default_reconnect_multiplier() -> f64 {
    2.0
}

fn default_reconnect_jitter() -> f64 {
    0.2
}

fn default_protocol_error_threshold() -> u32 {
    10
}

fn default_snapshot_timeout_ms() -> u64 {
    10_000
}

fn default_snapshot_retry_delay_ms() -> u64 {
    2_000
}

fn default_http_timeout_ms() -> u64 {
    20_000
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bittrex_socket_url: default_socket_url(),
            bittrex_socket_hub: default_socket_hub(),
            bittrex_api_key: None,
            bittrex_api_secret: None,
            handle_buffer_capacity: default_buffer_capacity(),
            pending_delta_limit: default_pending_delta_limit(),
            ws_idle_timeout_ms: default_idle_timeout_ms(),
            ws_heartbeat_interval_ms: default_heartbeat_interval_ms(),
            ws_connect_timeout_ms: default_connect_timeout_ms(),
            ws_reconnect_initial_delay_ms: default_reconnect_initial_delay_ms(),
            ws_reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            ws_reconnect_multiplier: default_reconnect_multiplier(),
            ws_reconnect_jitter: default_reconnect_jitter(),
            protocol_error_threshold: default_protocol_error_threshold(),
            snapshot_timeout_ms: default_snapshot_timeout_ms(),
            snapshot_retry_delay_ms: default_snapshot_retry_delay_ms(),
            http_timeout_ms: default_http_timeout_ms(),
            port: default_port(),
            rust_log: default_log_level(),
            verbose: false,
        }
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        if url::Url::parse(&self.bittrex_socket_url).is_err() {
            return Err("BITTREX_SOCKET_URL must be an absolute URL".to_string());
        }

        if !self.bittrex_socket_url.ends_with('/') {
            return Err("BITTREX_SOCKET_URL must end with '/'".to_string());
        }

        if self.bittrex_socket_hub.is_empty() {
            return Err("BITTREX_SOCKET_HUB must not be empty".to_string());
        }

        if self.bittrex_api_key.is_some() != self.bittrex_api_secret.is_some() {
            return Err("BITTREX_API_KEY and BITTREX_API_SECRET must be set together".to_string());
        }

        if self.handle_buffer_capacity == 0 {
            return Err("HANDLE_BUFFER_CAPACITY must be at least 1".to_string());
        }

        if self.ws_idle_timeout_ms <= self.ws_heartbeat_interval_ms {
            return Err("WS_IDLE_TIMEOUT_MS must exceed WS_HEARTBEAT_INTERVAL_MS".to_string());
        }

        if self.ws_reconnect_max_delay_ms < self.ws_reconnect_initial_delay_ms {
            return Err(
                "WS_RECONNECT_MAX_DELAY_MS must not be below WS_RECONNECT_INITIAL_DELAY_MS"
                    .to_string(),
            );
        }

        if self.ws_reconnect_multiplier < 1.0 {
            return Err("WS_RECONNECT_MULTIPLIER must be at least 1.0".to_string());
        }

        if !(0.0..1.0).contains(&self.ws_reconnect_jitter) {
            return Err("WS_RECONNECT_JITTER must be in [0, 1)".to_string());
        }

        Ok(())
    }

    /// Check if account feed credentials are configured.
    pub fn has_credentials(&self) -> bool {
        self.bittrex_api_key.is_some() && self.bittrex_api_secret.is_some()
    }
}
