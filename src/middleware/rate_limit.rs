use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    error::AppError,
    middleware::{auth::user_from_headers, client_ip::client_ip},
    rate_limit::{RateDecision, policy_for_path},
    state::AppState,
};

const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Authenticated callers are counted per user, everyone else per client IP.
pub fn identity_for(headers: &HeaderMap, peer: Option<SocketAddr>, trusted: &[IpAddr]) -> String {
    if headers.contains_key(axum::http::header::AUTHORIZATION) {
        if let Ok(user) = user_from_headers(headers) {
            return format!("user:{}", user.user_id);
        }
    }

    match client_ip(headers, peer, trusted) {
        Some(ip) => format!("ip:{ip}"),
        None => "ip:unknown".to_string(),
    }
}

pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path();
    if !path.starts_with("/api") {
        return next.run(request).await;
    }

    let policy = policy_for_path(path);
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let identity = identity_for(request.headers(), peer, &state.config.trusted_proxies);
    let decision = state.limiter.check(&identity, &policy).await;

    if !decision.allowed {
        let retry_after_secs = decision.retry_after_secs.unwrap_or(1);
        let mut response = AppError::RateLimited { retry_after_secs }.into_response();
        apply_headers(response.headers_mut(), &decision);
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &decision);
    response
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(decision.reset_at.timestamp()));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy() -> Vec<IpAddr> {
        vec!["10.0.0.1".parse().unwrap()]
    }

    #[test]
    fn forwarded_ip_counts_behind_trusted_proxy() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        let peer = "10.0.0.1:4000".parse().ok();
        assert_eq!(identity_for(&headers, peer, &proxy()), "ip:203.0.113.7");
    }

    #[test]
    fn spoofed_forwarding_header_counts_the_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));
        let peer = "192.0.2.10:5000".parse().ok();
        assert_eq!(identity_for(&headers, peer, &proxy()), "ip:192.0.2.10");
        assert_eq!(identity_for(&HeaderMap::new(), None, &proxy()), "ip:unknown");
    }

    #[test]
    fn unverifiable_token_counts_by_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer not-a-jwt"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        let peer = "10.0.0.1:4000".parse().ok();
        assert_eq!(identity_for(&headers, peer, &proxy()), "ip:198.51.100.2");
    }
}
