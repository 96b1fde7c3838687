//! Client configuration with sensible defaults.
//!
//! [`Credentials`] hold the two identity values every request needs and are
//! normally read from the process environment. [`ClientConfig`] carries the
//! transport knobs (base URL, timeout, retry policy). Both are plain values:
//! build them once, hand them to [`Transport::new`](crate::api::Transport::new).

use std::time::Duration;

use crate::api::retry::RetryConfig;
use crate::error::{PowerdrillError, Result};

/// Default API root.
pub const BASE_URL: &str = "https://ai.data.cloud/api";

pub const USER_ID_ENV: &str = "POWERDRILL_USER_ID";
pub const API_KEY_ENV: &str = "POWERDRILL_PROJECT_API_KEY";
pub const BASE_URL_ENV: &str = "POWERDRILL_BASE_URL";

/// Identity sent with every metadata request.
#[derive(Clone)]
pub struct Credentials {
    pub user_id: String,
    pub api_key: String,
}

impl Credentials {
    pub fn new(user_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            api_key: api_key.into(),
        }
    }

    /// Read `POWERDRILL_USER_ID` and `POWERDRILL_PROJECT_API_KEY`.
    ///
    /// Empty values count as missing.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let user_id = lookup(USER_ID_ENV).unwrap_or_default();
        let api_key = lookup(API_KEY_ENV).unwrap_or_default();
        if user_id.is_empty() || api_key.is_empty() {
            return Err(PowerdrillError::MissingCredentials);
        }
        Ok(Self { user_id, api_key })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root, without a trailing slash. Default: [`BASE_URL`].
    pub base_url: String,
    /// Per-request timeout. Streaming reads are governed by
    /// [`StreamOptions`](crate::api::streaming::StreamOptions) instead.
    /// Default: 120 s.
    pub request_timeout: Duration,
    pub user_agent: String,
    /// Retry policy for idempotent metadata calls.
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            request_timeout: Duration::from_secs(120),
            user_agent: concat!("powerdrill-rs/", env!("CARGO_PKG_VERSION")).to_string(),
            retry: RetryConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults, with the base URL taken from `POWERDRILL_BASE_URL` when set.
    pub fn from_env() -> Self {
        match std::env::var(BASE_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => Self::default().with_base_url(url),
            _ => Self::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}
