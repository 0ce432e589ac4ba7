//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use crate::reconciler::ReconcileStrategy;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tasksync_protocol::HttpResponse;

/// The outcome of one request attempt, as seen by a retry predicate.
#[derive(Debug, Clone, Copy)]
pub enum Attempt<'a> {
    /// The server answered with a non-success status.
    Response(&'a HttpResponse),
    /// No response was received.
    NetworkFailure(&'a str),
}

/// Predicate deciding whether an attempt should be retried.
pub type RetryPredicate = Arc<dyn Fn(&Attempt<'_>) -> bool + Send + Sync>;

/// Retry behavior of the resilient client.
///
/// A request is sent at most `max_retries + 1` times. Before retry number
/// `n` (starting at 0) the client waits `base_delay * 2^n`.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Decides whether a failed attempt is retried.
    pub should_retry: RetryPredicate,
}

impl RetryPolicy {
    /// Creates a policy with the default retry predicate.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            should_retry: Arc::new(default_should_retry),
        }
    }

    /// Creates a policy that never retries.
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Replaces the retry predicate.
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&Attempt<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// Returns the wait before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Total time spent waiting when every retry is used.
    pub fn worst_case_delay(&self) -> Duration {
        (0..self.max_retries)
            .map(|i| self.delay_for_attempt(i))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .finish_non_exhaustive()
    }
}

/// Retries when nothing came back or the server failed with a 5xx status.
pub fn default_should_retry(attempt: &Attempt<'_>) -> bool {
    match attempt {
        Attempt::NetworkFailure(_) => true,
        Attempt::Response(response) => response.status >= 500,
    }
}

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the record store.
    pub server_url: String,
    /// User-Agent sent with every request.
    pub user_agent: String,
    /// Retry policy for regular requests.
    pub retry: RetryPolicy,
    /// Connection failures tolerated before the server is marked in error.
    pub failure_threshold: u32,
    /// Interval between liveness pings.
    pub ping_interval: Duration,
    /// Wait between reconnect attempts while in error.
    pub reconnect_interval: Duration,
    /// Number of reconnect pings before giving up.
    pub reconnect_attempts: u32,
    /// Per-request timeout of the HTTP client.
    pub request_timeout: Duration,
    /// Directory of the durable medium. In-memory when unset.
    pub data_dir: Option<PathBuf>,
    /// How staged changes are pushed.
    pub reconcile_strategy: ReconcileStrategy,
}

impl EngineConfig {
    /// Creates a configuration with defaults for the given server.
    pub fn new(server_url: impl Into<String>) -> Self {
        let retry = RetryPolicy::default();
        Self {
            server_url: server_url.into(),
            user_agent: concat!("tasksync/", env!("CARGO_PKG_VERSION")).to_string(),
            failure_threshold: retry.max_retries,
            retry,
            ping_interval: Duration::from_secs(30),
            reconnect_interval: Duration::from_secs(120),
            reconnect_attempts: 20,
            request_timeout: Duration::from_secs(30),
            data_dir: None,
            reconcile_strategy: ReconcileStrategy::default(),
        }
    }

    /// Reads the configuration from `TASKSYNC_*` environment variables.
    pub fn from_env() -> SyncResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SyncResult<Self> {
        let mut config = Self::new(
            lookup("TASKSYNC_SERVER_URL").unwrap_or_else(|| "http://127.0.0.1:8080".into()),
        );

        if let Some(retries) = parse_var::<u32>(&lookup, "TASKSYNC_MAX_RETRIES")? {
            config.retry.max_retries = retries;
            config.failure_threshold = retries;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "TASKSYNC_BASE_DELAY_MS")? {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "TASKSYNC_PING_INTERVAL_SECS")? {
            config.ping_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "TASKSYNC_RECONNECT_INTERVAL_SECS")? {
            config.reconnect_interval = Duration::from_secs(secs);
        }
        if let Some(n) = parse_var::<u32>(&lookup, "TASKSYNC_RECONNECT_ATTEMPTS")? {
            config.reconnect_attempts = n;
        }
        if let Some(dir) = lookup("TASKSYNC_DATA_DIR").filter(|d| !d.is_empty()) {
            config.data_dir = Some(PathBuf::from(dir));
        }
        Ok(config)
    }

    /// Sets the retry policy. The failure threshold follows `max_retries`.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.failure_threshold = retry.max_retries;
        self.retry = retry;
        self
    }

    /// Sets the failure threshold independently of the retry policy.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the ping interval.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Sets the reconnect wait and budget.
    pub fn with_reconnect(mut self, interval: Duration, attempts: u32) -> Self {
        self.reconnect_interval = interval;
        self.reconnect_attempts = attempts;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the durable storage directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Sets the reconciliation strategy.
    pub fn with_reconcile_strategy(mut self, strategy: ReconcileStrategy) -> Self {
        self.reconcile_strategy = strategy;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("http://127.0.0.1:8080")
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> SyncResult<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| SyncError::Config {
                name: name.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
    }
}
