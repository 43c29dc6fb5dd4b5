//! Sliding-window rate limiting over a shared sorted set.
//!
//! Each identity owns one sorted set of request timestamps (milliseconds) per
//! policy. A check prunes entries older than the window, counts the rest and
//! admits the request only while the count is below the limit. On Redis the
//! three steps run as one Lua script so concurrent bursts cannot overshoot.
//!
//! When the shared store is unreachable or slow the limiter fails open: the
//! request is admitted, a warning is logged and `rate_limit_fail_open_total`
//! is bumped. Counters are best effort and may drift during store failover.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use redis::{Script, aio::ConnectionManager};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::metrics::{self, MetricsCollector};

const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local allowed = 0
if count < limit then
  redis.call('ZADD', key, now, ARGV[4])
  redis.call('PEXPIRE', key, window)
  allowed = 1
  count = count + 1
end
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_score = now
if oldest[2] then
  oldest_score = tonumber(oldest[2])
end
return {allowed, count, oldest_score}
"#;

/// Window and threshold for one class of endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    pub name: &'static str,
    pub window: Duration,
    pub max_requests: u32,
}

impl RatePolicy {
    pub const AUTH: RatePolicy = RatePolicy {
        name: "auth",
        window: Duration::from_secs(15 * 60),
        max_requests: 5,
    };
    pub const PAYMENT: RatePolicy = RatePolicy {
        name: "payment",
        window: Duration::from_secs(60),
        max_requests: 10,
    };
    pub const WEBHOOK: RatePolicy = RatePolicy {
        name: "webhook",
        window: Duration::from_secs(60),
        max_requests: 100,
    };
    pub const SEARCH: RatePolicy = RatePolicy {
        name: "search",
        window: Duration::from_secs(60),
        max_requests: 30,
    };
    pub const API: RatePolicy = RatePolicy {
        name: "api",
        window: Duration::from_secs(15 * 60),
        max_requests: 100,
    };

    pub fn new(name: &'static str, window: Duration, max_requests: u32) -> Self {
        Self {
            name,
            window,
            max_requests,
        }
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Picks the policy by route prefix; first match wins.
pub fn policy_for_path(path: &str) -> RatePolicy {
    const ROUTES: [(&str, RatePolicy); 5] = [
        ("/api/auth", RatePolicy::AUTH),
        ("/api/payments/webhook", RatePolicy::WEBHOOK),
        ("/api/payments", RatePolicy::PAYMENT),
        ("/api/search", RatePolicy::SEARCH),
        ("/api", RatePolicy::API),
    ];
    ROUTES
        .iter()
        .find(|(prefix, _)| path.starts_with(prefix))
        .map(|(_, policy)| *policy)
        .unwrap_or(RatePolicy::API)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    /// True when the store could not be consulted and the request was let through.
    pub degraded: bool,
}

/// One prune/count/insert step as reported by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowReply {
    pub allowed: bool,
    /// Entries in the window after this step.
    pub count: i64,
    pub oldest_ms: i64,
}

impl WindowReply {
    fn from_script(reply: &[i64]) -> Option<Self> {
        match reply {
            [allowed, count, oldest] => Some(Self {
                allowed: *allowed == 1,
                count: *count,
                oldest_ms: *oldest,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("malformed script reply")]
    MalformedReply,
}

/// Shared counter store behind the limiter. `hit` must run the whole
/// prune/count/insert step atomically for `key`.
#[async_trait]
pub trait WindowStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn hit(&self, key: &str, policy: &RatePolicy, now_ms: i64) -> Result<WindowReply, StoreError>;
}

pub struct RedisStore {
    conn: ConnectionManager,
    script: Script,
    namespace: String,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager, namespace: impl Into<String>) -> Self {
        Self {
            conn,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl WindowStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn hit(&self, key: &str, policy: &RatePolicy, now_ms: i64) -> Result<WindowReply, StoreError> {
        let redis_key = format!("{}:{key}", self.namespace);
        let mut conn = self.conn.clone();
        let member = format!("{now_ms}-{}", Uuid::new_v4().simple());
        let mut invocation = self.script.key(&redis_key);
        invocation
            .arg(now_ms)
            .arg(policy.window_ms())
            .arg(policy.max_requests)
            .arg(member);
        let reply: Vec<i64> = invocation.invoke_async(&mut conn).await?;
        WindowReply::from_script(&reply).ok_or(StoreError::MalformedReply)
    }
}

const SWEEP_INTERVAL_MS: i64 = 60_000;

struct Window {
    window_ms: i64,
    hits: VecDeque<i64>,
}

impl Window {
    fn prune(&mut self, now_ms: i64) {
        while self.hits.front().is_some_and(|ts| *ts <= now_ms - self.window_ms) {
            self.hits.pop_front();
        }
    }
}

/// Process-local store. Identities whose window has emptied are dropped by a
/// sweep that runs at most once per [`SWEEP_INTERVAL_MS`].
#[derive(Default)]
pub struct InMemoryStore {
    windows: DashMap<String, Window>,
    last_sweep_ms: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identity/policy keys currently held.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    fn maybe_sweep(&self, now_ms: i64) {
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if now_ms - last < SWEEP_INTERVAL_MS {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        self.windows.retain(|_, window| {
            window.prune(now_ms);
            !window.hits.is_empty()
        });
    }
}

#[async_trait]
impl WindowStore for InMemoryStore {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    async fn hit(&self, key: &str, policy: &RatePolicy, now_ms: i64) -> Result<WindowReply, StoreError> {
        // Must run before `entry` below: `retain` takes every shard lock.
        self.maybe_sweep(now_ms);

        // The entry guard holds the shard lock for the whole prune/count/insert.
        let mut window = self.windows.entry(key.to_string()).or_insert_with(|| Window {
            window_ms: policy.window_ms(),
            hits: VecDeque::new(),
        });
        window.prune(now_ms);

        let allowed = window.hits.len() < policy.max_requests as usize;
        if allowed {
            window.hits.push_back(now_ms);
        }
        Ok(WindowReply {
            allowed,
            count: window.hits.len() as i64,
            oldest_ms: window.hits.front().copied().unwrap_or(now_ms),
        })
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    timeout: Duration,
    metrics: MetricsCollector,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn WindowStore>, timeout: Duration, metrics: MetricsCollector) -> Self {
        Self {
            store,
            timeout,
            metrics,
        }
    }

    pub fn redis(
        conn: ConnectionManager,
        namespace: impl Into<String>,
        timeout: Duration,
        metrics: MetricsCollector,
    ) -> Self {
        Self::new(Arc::new(RedisStore::new(conn, namespace)), timeout, metrics)
    }

    /// Process-local store, used in tests and when no Redis is configured.
    pub fn in_memory(metrics: MetricsCollector) -> Self {
        Self::new(Arc::new(InMemoryStore::new()), Duration::from_millis(50), metrics)
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.name()
    }

    pub async fn check(&self, identity: &str, policy: &RatePolicy) -> RateDecision {
        self.check_at(identity, policy, Utc::now().timestamp_millis())
            .await
    }

    pub async fn check_at(&self, identity: &str, policy: &RatePolicy, now_ms: i64) -> RateDecision {
        let key = format!("{}:{}", policy.name, identity);
        let reply = tokio::time::timeout(self.timeout, self.store.hit(&key, policy, now_ms)).await;
        let decision = match reply {
            Ok(Ok(reply)) => build_decision(reply, policy, now_ms),
            Ok(Err(err)) => return self.fail_open(identity, policy, now_ms, &err.to_string()),
            Err(_) => return self.fail_open(identity, policy, now_ms, "store timed out"),
        };

        if decision.allowed {
            self.metrics.incr(metrics::RATE_LIMIT_ALLOWED);
        } else {
            self.metrics.incr(metrics::RATE_LIMIT_DENIED);
            tracing::warn!(
                identity = %identity,
                policy = policy.name,
                retry_after = ?decision.retry_after_secs,
                "rate limit exceeded"
            );
        }
        decision
    }

    fn fail_open(&self, identity: &str, policy: &RatePolicy, now_ms: i64, reason: &str) -> RateDecision {
        self.metrics.incr(metrics::RATE_LIMIT_FAIL_OPEN);
        tracing::warn!(
            identity = %identity,
            policy = policy.name,
            reason = %reason,
            "rate limiter store unavailable, failing open"
        );
        RateDecision {
            allowed: true,
            limit: policy.max_requests,
            remaining: policy.max_requests,
            reset_at: millis_to_datetime(now_ms + policy.window_ms()),
            retry_after_secs: None,
            degraded: true,
        }
    }
}

fn build_decision(reply: WindowReply, policy: &RatePolicy, now_ms: i64) -> RateDecision {
    let reset_ms = reply.oldest_ms + policy.window_ms();
    let remaining = (i64::from(policy.max_requests) - reply.count).max(0);
    let retry_after_secs = if reply.allowed {
        None
    } else {
        let wait_ms = (reset_ms - now_ms).max(1);
        Some(u64::try_from((wait_ms + 999) / 1000).unwrap_or(1))
    };

    RateDecision {
        allowed: reply.allowed,
        limit: policy.max_requests,
        remaining: u32::try_from(remaining).unwrap_or(0),
        reset_at: millis_to_datetime(reset_ms),
        retry_after_secs,
        degraded: false,
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RatePolicy {
        RatePolicy::new("test", Duration::from_secs(60), 5)
    }

    #[tokio::test]
    async fn sixth_request_in_window_is_rejected() {
        let limiter = RateLimiter::in_memory(MetricsCollector::new());
        let start = 1_700_000_000_000;

        for i in 0..5 {
            let decision = limiter.check_at("ip:10.0.0.1", &policy(), start + i * 1000).await;
            assert!(decision.allowed, "request {i} should pass");
            assert_eq!(decision.remaining, 4 - i as u32);
        }

        let rejected = limiter.check_at("ip:10.0.0.1", &policy(), start + 5000).await;
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.retry_after_secs, Some(55));
    }

    #[tokio::test]
    async fn window_slides_open_again() {
        let limiter = RateLimiter::in_memory(MetricsCollector::new());
        let start = 1_700_000_000_000;
        for i in 0..5 {
            limiter.check_at("user:1", &policy(), start + i).await;
        }
        assert!(!limiter.check_at("user:1", &policy(), start + 10).await.allowed);

        let later = limiter.check_at("user:1", &policy(), start + 60_001).await;
        assert!(later.allowed);
    }

    #[tokio::test]
    async fn rejected_requests_do_not_extend_the_window() {
        let limiter = RateLimiter::in_memory(MetricsCollector::new());
        let start = 1_700_000_000_000;
        for _ in 0..5 {
            limiter.check_at("ip:a", &policy(), start).await;
        }
        for offset in [1_000, 30_000, 59_000] {
            assert!(!limiter.check_at("ip:a", &policy(), start + offset).await.allowed);
        }
        assert!(limiter.check_at("ip:a", &policy(), start + 60_000).await.allowed);
    }

    #[tokio::test]
    async fn identities_and_policies_are_isolated() {
        let metrics = MetricsCollector::new();
        let limiter = RateLimiter::in_memory(metrics.clone());
        let start = 1_700_000_000_000;
        for _ in 0..5 {
            limiter.check_at("ip:a", &policy(), start).await;
        }
        assert!(!limiter.check_at("ip:a", &policy(), start).await.allowed);
        assert!(limiter.check_at("ip:b", &policy(), start).await.allowed);
        assert!(limiter.check_at("ip:a", &RatePolicy::WEBHOOK, start).await.allowed);

        assert_eq!(metrics.get(metrics::RATE_LIMIT_DENIED), 1);
        assert_eq!(metrics.get(metrics::RATE_LIMIT_ALLOWED), 7);
    }

    #[test]
    fn routes_select_policies_by_prefix() {
        assert_eq!(policy_for_path("/api/payments/webhook"), RatePolicy::WEBHOOK);
        assert_eq!(policy_for_path("/api/payments/init"), RatePolicy::PAYMENT);
        assert_eq!(policy_for_path("/api/auth/login"), RatePolicy::AUTH);
        assert_eq!(policy_for_path("/api/search?q=mug"), RatePolicy::SEARCH);
        assert_eq!(policy_for_path("/api/orders"), RatePolicy::API);
    }

    #[test]
    fn script_reply_is_decoded() {
        let now = 1_700_000_000_000;
        let reply = WindowReply::from_script(&[0, 5, now - 10_000]).unwrap();
        let decision = build_decision(reply, &policy(), now);
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_secs, Some(50));
        assert!(WindowReply::from_script(&[1, 2]).is_none());
    }

    struct BrokenStore;

    #[async_trait]
    impl WindowStore for BrokenStore {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn hit(&self, _: &str, _: &RatePolicy, _: i64) -> Result<WindowReply, StoreError> {
            Err(StoreError::MalformedReply)
        }
    }

    struct StalledStore;

    #[async_trait]
    impl WindowStore for StalledStore {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn hit(&self, _: &str, _: &RatePolicy, now_ms: i64) -> Result<WindowReply, StoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(WindowReply {
                allowed: false,
                count: 5,
                oldest_ms: now_ms,
            })
        }
    }

    #[tokio::test]
    async fn store_error_fails_open() {
        let metrics = MetricsCollector::new();
        let limiter = RateLimiter::new(Arc::new(BrokenStore), Duration::from_millis(50), metrics.clone());

        let decision = limiter.check_at("ip:a", &policy(), 1_700_000_000_000).await;
        assert!(decision.allowed);
        assert!(decision.degraded);
        assert_eq!(decision.remaining, 5);
        assert_eq!(metrics.get(metrics::RATE_LIMIT_FAIL_OPEN), 1);
        assert_eq!(metrics.get(metrics::RATE_LIMIT_ALLOWED), 0);
    }

    #[tokio::test]
    async fn slow_store_fails_open_after_timeout() {
        let metrics = MetricsCollector::new();
        let limiter = RateLimiter::new(Arc::new(StalledStore), Duration::from_millis(20), metrics.clone());

        let started = std::time::Instant::now();
        let decision = limiter.check_at("ip:a", &policy(), 1_700_000_000_000).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(decision.allowed);
        assert!(decision.degraded);
        assert_eq!(metrics.get(metrics::RATE_LIMIT_FAIL_OPEN), 1);
    }

    #[tokio::test]
    async fn idle_identities_are_evicted() {
        let store = InMemoryStore::new();
        let start = 1_700_000_000_000;

        for identity in ["test:ip:a", "test:ip:b", "test:ip:c"] {
            store.hit(identity, &policy(), start).await.unwrap();
        }
        assert_eq!(store.tracked_keys(), 3);

        // Past the window and the sweep interval, only the active key remains.
        store.hit("test:ip:d", &policy(), start + 60_001).await.unwrap();
        assert_eq!(store.tracked_keys(), 1);
    }

    #[tokio::test]
    async fn active_identities_survive_a_sweep() {
        let store = InMemoryStore::new();
        let start = 1_700_000_000_000;

        store.hit("test:ip:a", &policy(), start).await.unwrap();
        store.hit("test:ip:b", &policy(), start + 30_000).await.unwrap();
        store.hit("test:ip:c", &policy(), start + 60_001).await.unwrap();

        assert_eq!(store.tracked_keys(), 2);
        let reply = store.hit("test:ip:b", &policy(), start + 60_002).await.unwrap();
        assert_eq!(reply.count, 2);
    }
}
