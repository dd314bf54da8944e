//! Client identification and proxy headers.
//!
//! # Responsibilities
//! - Derive the selection key (client IP) from a request
//! - Mark forwarded requests with the proxy identity and client address
//! - Extend `X-Forwarded-For` with the transport peer

use std::net::{IpAddr, SocketAddr};

use axum::http::{HeaderMap, HeaderName, HeaderValue};

pub const X_PROXY: HeaderName = HeaderName::from_static("x-proxy");
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Value of the `X-Proxy` header on every forwarded request.
pub const PROXY_IDENTITY: &str = "Balancer-Reverse-Proxy";

/// Resolve the client address for `headers` received from `remote`.
///
/// Prefers the first `X-Forwarded-For` entry, then `X-Real-IP`, then the
/// peer address of the connection.
pub fn client_ip(headers: &HeaderMap, remote: SocketAddr) -> String {
    let forwarded = headers
        .get(&X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get(&X_REAL_IP)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    remote.ip().to_string()
}

/// Stamp a request about to be forwarded.
pub fn apply_proxy_headers(headers: &mut HeaderMap, client_ip: &str, peer: IpAddr) {
    headers.insert(X_PROXY, HeaderValue::from_static(PROXY_IDENTITY));

    if let Ok(value) = HeaderValue::from_str(client_ip) {
        headers.insert(X_REAL_IP, value);
    }

    // Multiple prior headers are folded into one comma separated chain.
    let prior: Vec<&str> = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    let chain = if prior.is_empty() {
        peer.to_string()
    } else {
        format!("{}, {}", prior.join(", "), peer)
    };
    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
