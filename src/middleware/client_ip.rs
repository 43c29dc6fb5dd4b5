use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};

use crate::state::AppState;

/// The caller's address. Forwarding headers are believed only when the socket
/// peer is one of `trusted` proxies; otherwise the peer itself is the caller.
///
/// Behind a trusted proxy the `X-Forwarded-For` chain is read right to left and
/// the first hop that is not itself a trusted proxy wins, then `X-Real-IP`.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trusted: &[IpAddr]) -> Option<String> {
    let peer = peer.map(|addr| addr.ip())?;
    if !trusted.contains(&peer) {
        return Some(peer.to_string());
    }

    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());

    let forwarded = header("x-forwarded-for").and_then(|chain| {
        let hops: Vec<&str> = chain
            .split(',')
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
            .collect();
        hops.iter()
            .rev()
            .find(|hop| hop.parse::<IpAddr>().map_or(true, |ip| !trusted.contains(&ip)))
            .or(hops.first())
            .map(|hop| hop.to_string())
    });

    forwarded
        .or_else(|| {
            header("x-real-ip")
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
                .map(str::to_string)
        })
        .or_else(|| Some(peer.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        Ok(ClientIp(
            client_ip(&parts.headers, peer, &state.config.trusted_proxies)
                .unwrap_or_else(|| "127.0.0.1".to_string()),
        ))
    }
}
