//! Client identity resolution behind reverse proxies

use axum::http::HeaderMap;
use std::net::SocketAddr;

pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// Identity used as the client admission key.
///
/// With `trusted_hops` proxies in front, each appends the address it saw to
/// `X-Forwarded-For`; the entry `trusted_hops` from the end is the one the
/// outermost trusted proxy received. Falls back to the peer address.
pub fn client_identity(headers: &HeaderMap, peer: SocketAddr, trusted_hops: usize) -> String {
    if trusted_hops > 0 {
        let chain: Vec<&str> = headers
            .get_all(FORWARDED_FOR)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .collect();

        if chain.len() >= trusted_hops {
            return chain[chain.len() - trusted_hops].to_string();
        }
    }
    peer.ip().to_string()
}
