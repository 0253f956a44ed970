//! API credentials and the account feed challenge signature.

use std::fmt;

use aws_lc_rs::hmac;

use crate::config::Config;

/// API key and secret for the account feed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Public API key, sent in the clear.
    pub api_key: String,
    api_secret: String,
}

impl Credentials {
    /// Create credentials from a key and secret.
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Credentials from the configuration, when both halves are set.
    pub fn from_config(config: &Config) -> Option<Self> {
        match (&config.bittrex_api_key, &config.bittrex_api_secret) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Some(Self::new(key.clone(), secret.clone()))
            }
            _ => None,
        }
    }

    /// Sign an auth context challenge: lowercase hex HMAC-SHA512 keyed with
    /// the API secret.
    pub fn sign(&self, challenge: &str) -> String {
        let key = hmac::Key::new(hmac::HMAC_SHA512, self.api_secret.as_bytes());
        let tag = hmac::sign(&key, challenge.as_bytes());
        hex::encode(tag.as_ref())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}
