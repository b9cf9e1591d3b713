use std::collections::{HashMap, VecDeque};
use std::result::Result;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use super::{AbstractRateLimitStore, RateLimitError, RateLimitVerdict};

// idle keys are swept once the map grows beyond this
const SWEEP_THRESHOLD: usize = 4096;

pub struct InMemRateLimitStore {
    window: Duration,
    max_requests: u32,
    history: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl InMemRateLimitStore {
    pub fn new(window_secs: u32, max_requests: u32) -> Self {
        Self {
            window: Duration::seconds(window_secs as i64),
            max_requests,
            history: Mutex::new(HashMap::new()),
        }
    }

    fn evict_expired(log: &mut VecDeque<DateTime<Utc>>, oldest_valid: DateTime<Utc>) {
        while log.front().is_some_and(|t| *t <= oldest_valid) {
            let _ = log.pop_front();
        }
    }
}

#[async_trait]
impl AbstractRateLimitStore for InMemRateLimitStore {
    async fn hit(&self, key: &str, now: DateTime<Utc>) -> Result<RateLimitVerdict, RateLimitError> {
        let oldest_valid = now - self.window;
        let mut guard = self.history.lock().await;
        if guard.len() > SWEEP_THRESHOLD {
            guard.retain(|_k, log| {
                Self::evict_expired(log, oldest_valid);
                !log.is_empty()
            });
        }
        let log = guard.entry(key.to_string()).or_default();
        Self::evict_expired(log, oldest_valid);
        let verdict = if (log.len() as u32) < self.max_requests {
            log.push_back(now);
            RateLimitVerdict {
                allowed: true,
                retry_after_secs: 0,
            }
        } else {
            let wait = log
                .front()
                .map(|t| (*t + self.window - now).num_seconds())
                .unwrap_or(0);
            RateLimitVerdict {
                allowed: false,
                retry_after_secs: wait.max(1) as u32,
            }
        };
        Ok(verdict)
    }

    async fn reset(&self, key: Option<&str>) -> Result<(), RateLimitError> {
        let mut guard = self.history.lock().await;
        if let Some(k) = key {
            let _discarded = guard.remove(k);
        } else {
            guard.clear();
        }
        Ok(())
    }
}
