use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;

/// Process-local counters, created in `main` and handed around through
/// `AppState`. Starts empty on every boot.
#[derive(Clone, Debug, Default)]
pub struct MetricsCollector {
    counters: Arc<DashMap<&'static str, AtomicU64>>,
}

pub const RATE_LIMIT_ALLOWED: &str = "rate_limit_allowed_total";
pub const RATE_LIMIT_DENIED: &str = "rate_limit_denied_total";
pub const RATE_LIMIT_FAIL_OPEN: &str = "rate_limit_fail_open_total";
pub const ORDERS_CREATED: &str = "orders_created_total";
pub const ORDER_TRANSITIONS: &str = "order_transitions_total";
pub const PAYMENTS_INITIATED: &str = "payments_initiated_total";
pub const PAYMENT_GATEWAY_ERRORS: &str = "payment_gateway_errors_total";
pub const WEBHOOK_PROCESSED: &str = "webhook_processed_total";
pub const WEBHOOK_DUPLICATE: &str = "webhook_duplicate_total";
pub const WEBHOOK_REJECTED: &str = "webhook_rejected_total";
pub const PAYMENT_ORDER_DIVERGENCE: &str = "payment_order_divergence_total";

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, name: &'static str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &'static str, value: u64) {
        self.counters
            .entry(name)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|counter| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().load(Ordering::Relaxed)))
            .collect()
    }

    pub fn reset(&self) {
        self.counters.clear();
    }
}
