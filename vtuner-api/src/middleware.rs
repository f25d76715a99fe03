// HTTP middleware: security headers, connection accounting, client IP
// resolution.

use axum::{
    extract::Request,
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Live HTTP connection counter. Incremented when a request arrives and
/// decremented once its response body has been fully written (or dropped).
/// WebSocket handlers hold their own guard for the socket's lifetime since
/// the upgrade response body ends at the hijack.
#[derive(Clone, Default)]
pub struct ConnectionCounter {
    active: Arc<AtomicI64>,
}

impl ConnectionCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn active(&self) -> i64 {
        self.active.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn guard(&self) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            active: self.active.clone(),
        }
    }
}

pub struct ConnectionGuard {
    active: Arc<AtomicI64>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Counts a request for as long as its response body lives.
pub async fn connection_count_middleware(
    axum::extract::State(counter): axum::extract::State<ConnectionCounter>,
    request: Request,
    next: Next,
) -> Response {
    let guard = counter.guard();
    let response = next.run(request).await;
    response.map(move |body| {
        axum::body::Body::new(CountedBody {
            inner: body,
            _guard: guard,
        })
    })
}

struct CountedBody {
    inner: axum::body::Body,
    _guard: ConnectionGuard,
}

impl http_body::Body for CountedBody {
    type Data = bytes::Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        std::pin::Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> http_body::SizeHint {
        self.inner.size_hint()
    }
}

/// Standard security headers on every response.
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
    response
}

/// Resolve the client address for rate limiting and loopback checks.
///
/// Proxy headers are only trusted when the socket peer itself is a private or
/// loopback address: `X-Real-IP` first, then the last `X-Forwarded-For` hop.
#[must_use]
pub fn client_ip(remote: SocketAddr, headers: &HeaderMap) -> IpAddr {
    let peer = remote.ip();
    if !is_private_or_loopback(peer) {
        return peer;
    }
    if let Some(real) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
    {
        return real;
    }
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next_back())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
    {
        return forwarded;
    }
    peer
}

fn is_private_or_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            if v6.is_loopback() {
                return true;
            }
            // fc00::/7 and fe80::/10
            matches!("fc00::/7".parse::<ipnet::Ipv6Net>(), Ok(net) if net.contains(&v6))
                || matches!("fe80::/10".parse::<ipnet::Ipv6Net>(), Ok(net) if net.contains(&v6))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(ip: &str) -> SocketAddr {
        format!("{ip}:12345").parse().unwrap()
    }

    #[test]
    fn test_public_peer_ignores_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "9.9.9.9".parse().unwrap());
        let ip = client_ip(addr("8.8.8.8"), &headers);
        assert_eq!(ip, "8.8.8.8".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_private_peer_trusts_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "1.2.3.4".parse().unwrap());
        let ip = client_ip(addr("192.168.1.10"), &headers);
        assert_eq!(ip, "1.2.3.4".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_private_peer_uses_last_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.1.1.1, 2.2.2.2".parse().unwrap());
        let ip = client_ip(addr("127.0.0.1"), &headers);
        assert_eq!(ip, "2.2.2.2".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_no_headers_falls_back_to_peer() {
        let ip = client_ip(addr("10.0.0.2"), &HeaderMap::new());
        assert_eq!(ip, "10.0.0.2".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_counter_guard() {
        let counter = ConnectionCounter::new();
        assert_eq!(counter.active(), 0);
        {
            let _a = counter.guard();
            let _b = counter.guard();
            assert_eq!(counter.active(), 2);
        }
        assert_eq!(counter.active(), 0);
    }
}
