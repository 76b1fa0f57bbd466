//! Client address extraction

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use std::convert::Infallible;
use std::net::SocketAddr;

/// Address of the calling client, proxy headers first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

/// Resolve the client address from `X-Forwarded-For`, `X-Real-IP` or the socket
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "0.0.0.0".to_string())
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientIp(resolve_client_ip(&parts.headers, peer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_forwarded_for_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("81.2.69.142, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(resolve_client_ip(&headers, None), "81.2.69.142");
    }

    #[test]
    fn test_falls_back_to_peer() {
        let peer: SocketAddr = "192.0.2.7:5555".parse().unwrap();
        assert_eq!(resolve_client_ip(&HeaderMap::new(), Some(peer)), "192.0.2.7");
        assert_eq!(resolve_client_ip(&HeaderMap::new(), None), "0.0.0.0");
    }
}
