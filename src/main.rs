use axum::http::{HeaderName, Request, Response};
use redis::aio::ConnectionManager;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::{net::SocketAddr, sync::Arc, time::Duration};

use order_payments_api::{
    build_app,
    config::AppConfig,
    db::{create_orm_conn, create_pool, run_migrations},
    gateway::client::PaytrClient,
    metrics::MetricsCollector,
    rate_limit::RateLimiter,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,order_payments_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let pool = create_pool(&config.database_url).await?;
    let orm = create_orm_conn(&config.database_url).await?;

    run_migrations(&orm).await?;

    let metrics = MetricsCollector::new();
    let limiter = build_limiter(&config, metrics.clone()).await;
    let paytr = PaytrClient::new(
        config.paytr.api_url.clone(),
        Duration::from_secs(config.paytr.timeout_secs),
    )?;
    if config.paytr.merchant_id.is_none() {
        tracing::warn!("PayTR credentials are not set, payment endpoints will answer CONFIG_ERROR");
    }

    let addr = SocketAddr::from((config.host.parse::<std::net::IpAddr>()?, config.port));
    let state = AppState {
        pool,
        orm,
        config: Arc::new(config),
        limiter,
        paytr,
        metrics,
    };

    let concurrency_limit_layer = ConcurrencyLimitLayer::new(100);

    let request_id_header = HeaderName::from_static("x-request-id");
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            tracing::info!(
                method = %request.method(),
                uri = %request.uri(),
                "request started"
            );
        })
        .on_response(|response: &Response<_>, latency: Duration, _span: &tracing::Span| {
            tracing::info!(
                status = %response.status(),
                ms = %latency.as_millis(),
                "request finished"
            );
        });

    let app = build_app(state)
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .layer(concurrency_limit_layer);

    tracing::info!("listening on {}", addr);

    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Redis-backed limiter when `REDIS_URL` is set and reachable, otherwise the
/// in-process store. Boot never fails on Redis.
async fn build_limiter(config: &AppConfig, metrics: MetricsCollector) -> RateLimiter {
    let Some(url) = config.redis_url.as_deref() else {
        tracing::info!("REDIS_URL not set, using in-memory rate limiter");
        return RateLimiter::in_memory(metrics);
    };

    let connect = async {
        let client = redis::Client::open(url)?;
        ConnectionManager::new(client).await
    };
    match tokio::time::timeout(Duration::from_secs(3), connect).await {
        Ok(Ok(conn)) => {
            tracing::info!("rate limiter backed by redis");
            RateLimiter::redis(
                conn,
                "rate_limit",
                Duration::from_millis(config.rate_limit_timeout_ms),
                metrics,
            )
        }
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "redis unavailable, falling back to in-memory rate limiter");
            RateLimiter::in_memory(metrics)
        }
        Err(_) => {
            tracing::warn!("redis connect timed out, falling back to in-memory rate limiter");
            RateLimiter::in_memory(metrics)
        }
    }
}
