use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::{DbPool, OrmConn},
    gateway::client::PaytrClient,
    metrics::MetricsCollector,
    rate_limit::RateLimiter,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub config: Arc<AppConfig>,
    pub limiter: RateLimiter,
    pub paytr: PaytrClient,
    pub metrics: MetricsCollector,
}
