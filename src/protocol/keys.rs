//! Minified payload key table.
//!
//! Hub payloads abbreviate every field name to one or two letters. Keys are
//! expanded once, right after decompression, so every typed message below
//! deserializes from readable names.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde_json::{Map, Value};

static KEYS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("A", "ask"),
        ("a", "available"),
        ("B", "bid"),
        ("b", "balance"),
        ("C", "closed"),
        ("c", "currency"),
        ("CI", "cancel_initiated"),
        ("D", "deltas"),
        ("d", "delta"),
        ("DT", "order_delta_type"),
        ("E", "exchange"),
        ("e", "exchange_delta_type"),
        ("F", "fill_type"),
        ("FI", "fill_id"),
        ("f", "fills"),
        ("G", "open_buy_orders"),
        ("g", "open_sell_orders"),
        ("H", "high"),
        ("h", "auto_sell"),
        ("I", "id"),
        ("i", "is_open"),
        ("J", "condition"),
        ("j", "condition_target"),
        ("K", "immediate_or_cancel"),
        ("k", "is_conditional"),
        ("L", "low"),
        ("l", "last"),
        ("M", "market_name"),
        ("m", "base_volume"),
        ("N", "nonce"),
        ("n", "commission_paid"),
        ("O", "orders"),
        ("o", "order"),
        ("OT", "order_type"),
        ("OU", "order_uuid"),
        ("P", "price"),
        ("p", "crypto_address"),
        ("PD", "prev_day"),
        ("PU", "price_per_unit"),
        ("Q", "quantity"),
        ("q", "quantity_remaining"),
        ("R", "rate"),
        ("r", "requested"),
        ("S", "sells"),
        ("s", "summaries"),
        ("T", "time_stamp"),
        ("t", "total"),
        ("TY", "type"),
        ("U", "uuid"),
        ("u", "updated"),
        ("V", "volume"),
        ("W", "account_id"),
        ("w", "account_uuid"),
        ("X", "limit"),
        ("x", "created"),
        ("Y", "opened"),
        ("y", "state"),
        ("Z", "buys"),
        ("z", "pending"),
    ])
});

/// Expand a single minified key. Unknown keys pass through.
pub fn expand_key(key: &str) -> &str {
    KEYS.get(key).copied().unwrap_or(key)
}

/// Recursively expand every object key in a decoded payload.
pub fn expand_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let expanded: Map<String, Value> = map
                .into_iter()
                .map(|(key, value)| (expand_key(&key).to_string(), expand_keys(value)))
                .collect();
            Value::Object(expanded)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(expand_keys).collect()),
        other => other,
    }
}
