pub mod audit;
pub mod config;
pub mod db;
pub mod domain;
pub mod dto;
pub mod entity;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod rate_limit;
pub mod response;
pub mod routes;
pub mod services;
pub mod state;

use axum::{Router, middleware::from_fn_with_state, routing::get};

use crate::{
    routes::{create_api_router, doc::scalar_docs, health, metrics as metrics_routes, not_found},
    state::AppState,
};

/// The full application router with state bound. Transport layers (tracing,
/// request ids, body and concurrency limits) are added by the binary.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(metrics_routes::metrics_snapshot))
        .nest("/api", create_api_router())
        .merge(scalar_docs())
        .fallback(not_found)
        .layer(from_fn_with_state(
            state.clone(),
            middleware::rate_limit::rate_limit,
        ))
        .with_state(state)
}
