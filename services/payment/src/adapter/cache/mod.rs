mod in_mem;

use std::boxed::Box;
use std::marker::{Send, Sync};
use std::result::Result;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use school_common::config::AppWebhookCfg;

pub use in_mem::InMemRateLimitStore;

#[derive(Debug)]
pub struct RateLimitError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitVerdict {
    pub allowed: bool,
    /// seconds the client should wait before next attempt, zero if allowed
    pub retry_after_secs: u32,
}

/// Sliding-window request counter keyed by client IP or gateway event id.
/// The state lives in the store so that several service instances could
/// share one counter backend.
#[async_trait]
pub trait AbstractRateLimitStore: Send + Sync {
    /// records one request of `key` at `now`, rejected requests are not
    /// recorded
    async fn hit(&self, key: &str, now: DateTime<Utc>) -> Result<RateLimitVerdict, RateLimitError>;

    /// clears the history of given key, or every key if `None`
    async fn reset(&self, key: Option<&str>) -> Result<(), RateLimitError>;
}

// TODO, shared counter backend (e.g. Redis) for multi-instance deployment,
// selected by config
pub fn app_cache_rate_limit(cfg: &AppWebhookCfg) -> Box<dyn AbstractRateLimitStore> {
    let obj = InMemRateLimitStore::new(cfg.rate_limit_window_secs, cfg.rate_limit_max_requests);
    Box::new(obj)
}
