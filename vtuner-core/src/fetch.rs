//! Upstream HTTP fetcher
//!
//! Shared client for playlist and stream fetches: cookie jar, redirect cap,
//! SSRF guard, fixed-delay retry and size-bounded body collection.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::header::{HeaderValue, RANGE};
use reqwest::redirect;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::FetchConfig;
use crate::error::{Error, Result};

const MAX_REDIRECTS: usize = 10;

#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    user_agent: String,
    max_retries: u32,
    retry_delay: Duration,
    max_playlist_download: u64,
    max_provider_download: u64,
    allow_loopback: bool,
}

impl Fetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let allow_loopback = config.allow_loopback;
        let policy = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() > MAX_REDIRECTS {
                return attempt.error("too many redirects");
            }
            if !allow_loopback {
                if let Some(ip) = url_ip_literal(attempt.url()) {
                    if is_forbidden_ip(ip) {
                        return attempt.error("redirect to forbidden address");
                    }
                }
            }
            attempt.follow()
        });

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(policy)
            .connect_timeout(Duration::from_secs(10))
            .use_rustls_tls()
            .build()
            .map_err(|e| Error::Internal(format!("http client: {e}")))?;

        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            max_playlist_download: config.max_playlist_download_mb * 1024 * 1024,
            max_provider_download: config.max_provider_download_mb * 1024 * 1024,
            allow_loopback,
        })
    }

    /// Single GET with SSRF guard and User-Agent. No retry.
    pub async fn get(&self, url: &str) -> Result<reqwest::Response> {
        self.get_with_range(url, 0).await
    }

    /// GET resuming at `offset` via a `Range: bytes=<offset>-` header.
    pub async fn get_with_range(&self, url: &str, offset: u64) -> Result<reqwest::Response> {
        self.guard(url).await?;

        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, &self.user_agent);
        if offset > 0 {
            let value = format!("bytes={offset}-");
            request = request.header(
                RANGE,
                HeaderValue::from_str(&value)
                    .map_err(|e| Error::Internal(format!("range header: {e}")))?,
            );
        }

        debug!(url, offset, "upstream GET");
        let response = request.send().await?;
        Ok(response)
    }

    /// HEAD request, used for WebDAV metadata resolution.
    pub async fn head(&self, url: &str) -> Result<reqwest::Response> {
        self.guard(url).await?;
        debug!(url, "upstream HEAD");
        let response = self
            .client
            .head(url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await?;
        Ok(response)
    }

    /// GET with retry: transient errors and non-2xx responses are retried
    /// after `retry_delay`, up to `max_retries` times. The final response is
    /// returned even when it is non-2xx; transport errors surface as the last
    /// error.
    pub async fn retry_get(&self, url: &str) -> Result<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            match self.get(url).await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    if attempt >= self.max_retries {
                        return Ok(response);
                    }
                    warn!(
                        url,
                        status = %response.status(),
                        attempt,
                        "upstream returned non-success, retrying"
                    );
                }
                Err(e) if e.is_transient() => {
                    if attempt >= self.max_retries {
                        return Err(e);
                    }
                    warn!(url, error = %e, attempt, "upstream fetch failed, retrying");
                }
                Err(e) => return Err(e),
            }
            attempt += 1;
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    /// Collect a body, failing with `TooLarge` past the playlist cap.
    pub async fn read_playlist_body(&self, response: reqwest::Response) -> Result<Bytes> {
        read_capped(response, self.max_playlist_download).await
    }

    /// Collect a body, failing with `TooLarge` past the provider cap.
    pub async fn read_provider_body(&self, response: reqwest::Response) -> Result<Bytes> {
        read_capped(response, self.max_provider_download).await
    }

    async fn guard(&self, url: &str) -> Result<()> {
        if self.allow_loopback {
            return Ok(());
        }
        let parsed =
            Url::parse(url).map_err(|e| Error::InvalidInput(format!("bad url {url}: {e}")))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(Error::Forbidden(format!("unsupported scheme: {other}")));
            }
        }

        if let Some(ip) = url_ip_literal(&parsed) {
            if is_forbidden_ip(ip) {
                return Err(Error::Forbidden(format!("forbidden address: {ip}")));
            }
            return Ok(());
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| Error::InvalidInput(format!("url without host: {url}")))?;
        let port = parsed.port_or_known_default().unwrap_or(80);
        let addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| Error::Transient(format!("resolve {host}: {e}")))?;
        for addr in addrs {
            if is_forbidden_ip(addr.ip()) {
                return Err(Error::Forbidden(format!(
                    "host {host} resolves to forbidden address {}",
                    addr.ip()
                )));
            }
        }
        Ok(())
    }
}

/// Shared fetcher handle.
pub type SharedFetcher = Arc<Fetcher>;

fn url_ip_literal(url: &Url) -> Option<IpAddr> {
    match url.host()? {
        url::Host::Ipv4(ip) => Some(IpAddr::V4(ip)),
        url::Host::Ipv6(ip) => Some(IpAddr::V6(ip)),
        url::Host::Domain(_) => None,
    }
}

/// Loopback, link-local and unspecified targets are refused unless the
/// loopback override is active.
#[must_use]
pub fn is_forbidden_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            if v6.is_loopback() || v6.is_unspecified() {
                return true;
            }
            // fe80::/10
            matches!(
                "fe80::/10".parse::<ipnet::Ipv6Net>(),
                Ok(net) if net.contains(&v6)
            )
        }
    }
}

async fn read_capped(response: reqwest::Response, cap: u64) -> Result<Bytes> {
    if let Some(len) = response.content_length() {
        if len > cap {
            return Err(Error::TooLarge(format!("{len} bytes (cap {cap})")));
        }
    }

    let mut body = BytesMut::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(Error::from)?;
        if body.len() as u64 + chunk.len() as u64 > cap {
            return Err(Error::TooLarge(format!(
                "body exceeds {cap} byte cap"
            )));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> FetchConfig {
        FetchConfig {
            allow_loopback: true, // wiremock binds to 127.0.0.1
            max_retries: 2,
            retry_delay_ms: 10,
            ..FetchConfig::default()
        }
    }

    #[test]
    fn test_forbidden_ips() {
        assert!(is_forbidden_ip("127.0.0.1".parse().unwrap()));
        assert!(is_forbidden_ip("169.254.10.1".parse().unwrap()));
        assert!(is_forbidden_ip("0.0.0.0".parse().unwrap()));
        assert!(is_forbidden_ip("::1".parse().unwrap()));
        assert!(is_forbidden_ip("fe80::1".parse().unwrap()));
        assert!(!is_forbidden_ip("8.8.8.8".parse().unwrap()));
        assert!(!is_forbidden_ip("2001:db8::1".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_loopback_rejected_without_override() {
        let config = FetchConfig {
            allow_loopback: false,
            ..FetchConfig::default()
        };
        let fetcher = Fetcher::new(&config).unwrap();
        let err = fetcher.get("http://127.0.0.1:9/x").await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_get_sends_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list.m3u"))
            .and(header("user-agent", "vTuner"))
            .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&test_config()).unwrap();
        let response = fetcher
            .get(&format!("{}/list.m3u", server.uri()))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_range_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/seg.ts"))
            .and(header("range", "bytes=100-"))
            .respond_with(ResponseTemplate::new(206))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&test_config()).unwrap();
        let response = fetcher
            .get_with_range(&format!("{}/seg.ts", server.uri()), 100)
            .await
            .unwrap();
        assert_eq!(response.status(), 206);
    }

    #[tokio::test]
    async fn test_retry_returns_final_non_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3) // initial attempt + max_retries
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&test_config()).unwrap();
        let response = fetcher
            .retry_get(&format!("{}/down", server.uri()))
            .await
            .unwrap();
        assert_eq!(response.status(), 503);
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&test_config()).unwrap();
        let response = fetcher
            .retry_get(&format!("{}/flaky", server.uri()))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_playlist_cap_enforced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 2 * 1024 * 1024]))
            .mount(&server)
            .await;

        let config = FetchConfig {
            max_playlist_download_mb: 1,
            ..test_config()
        };
        let fetcher = Fetcher::new(&config).unwrap();
        let response = fetcher.get(&format!("{}/big", server.uri())).await.unwrap();
        let err = fetcher.read_playlist_body(response).await.unwrap_err();
        assert!(matches!(err, Error::TooLarge(_)));
    }
}
