//! Fixed-window request throttle keyed per user and action
//!
//! Each call increments a counter named `rate:{action}:{subject}:{window}`
//! where `window = floor(now / window_secs)`. The first increment of a window
//! arms the counter's expiry. Once the post-increment count exceeds
//! `max_requests` the call is rejected with [`FootprintError::Throttled`].
//!
//! The increment and the conditional expiry happen in one atomic step inside
//! the [`CounterStore`], so concurrent callers sharing a key cannot overshoot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::config::RateLimitConfig;
use crate::error::{FootprintError, Result};

/// Throttled actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Scan,
    Send,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Scan => "scan",
            Action::Send => "send",
        }
    }
}

/// (action, subject) pair a limit applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub action: Action,
    pub subject: String,
}

impl RateLimitKey {
    pub fn new(action: Action, subject: impl ToString) -> Self {
        Self {
            action,
            subject: subject.to_string(),
        }
    }

    fn counter_name(&self, window: i64) -> String {
        format!("rate:{}:{}:{}", self.action.as_str(), self.subject, window)
    }
}

/// Shared counter storage with atomic increment-and-arm-expiry
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` and return the new count; when the new count is 1,
    /// the counter expires after `ttl`. Must be a single atomic operation.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64>;
}

#[async_trait]
impl<T: CounterStore + ?Sized> CounterStore for Arc<T> {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64> {
        self.as_ref().increment(key, ttl).await
    }
}

#[derive(Debug)]
struct Counter {
    count: u64,
    expires_at: Instant,
}

/// Process-local counter store
#[derive(Debug, Default, Clone)]
pub struct MemoryCounterStore {
    inner: Arc<Mutex<HashMap<String, Counter>>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live counters (expired ones are purged lazily)
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .lock()
            .await
            .values()
            .filter(|c| c.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64> {
        let now = Instant::now();
        let mut counters = self.inner.lock().await;
        counters.retain(|_, c| c.expires_at > now);

        let counter = counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at: now + ttl,
        });
        counter.count += 1;
        trace!("Counter {} at {}", key, counter.count);
        Ok(counter.count)
    }
}

/// Fixed-window limiter over a [`CounterStore`]
#[derive(Debug, Clone)]
pub struct RateLimiter<S> {
    store: S,
    max_requests: u64,
    window_secs: u64,
}

impl<S: CounterStore> RateLimiter<S> {
    pub fn new(store: S, config: &RateLimitConfig) -> Self {
        Self::with_limits(store, config.max_requests, config.window_secs)
    }

    /// # Arguments
    /// * `max_requests` - Calls admitted per window
    /// * `window_secs` - Window length in seconds (clamped to at least 1)
    pub fn with_limits(store: S, max_requests: u64, window_secs: u64) -> Self {
        Self {
            store,
            max_requests,
            window_secs: window_secs.max(1),
        }
    }

    /// Count a call against `key` in the current window
    pub async fn check(&self, key: &RateLimitKey) -> Result<()> {
        self.check_at(key, Utc::now()).await
    }

    /// Count a call against `key` in the window containing `now`
    pub async fn check_at(&self, key: &RateLimitKey, now: DateTime<Utc>) -> Result<()> {
        let window_secs = self.window_secs as i64;
        let timestamp = now.timestamp();
        let window = timestamp.div_euclid(window_secs);
        let name = key.counter_name(window);

        let count = self
            .store
            .increment(&name, Duration::from_secs(self.window_secs))
            .await?;

        if count > self.max_requests {
            let retry_after = ((window + 1) * window_secs - timestamp).max(1) as u64;
            warn!(
                "Throttled {} for {} ({} calls in window, retry after {}s)",
                key.action.as_str(),
                key.subject,
                count,
                retry_after
            );
            return Err(FootprintError::Throttled { retry_after });
        }

        debug!(
            "Admitted {} for {} ({}/{})",
            key.action.as_str(),
            key.subject,
            count,
            self.max_requests
        );
        Ok(())
    }
}
