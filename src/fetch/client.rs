//! Blocking HTTP client for static page fetches: browser-like headers, one connection pool,
//! certificate verification off, and retries with backoff for transient failures.

use super::FetchError;
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_REDIRECTS: usize = 10;

/// Default number of attempts (initial plus retries).
const DEFAULT_RETRY_COUNT: u32 = 3;
/// Default backoff delays in seconds after each failed attempt.
const DEFAULT_BACKOFF_SECS: [u64; 3] = [1, 2, 4];
/// Statuses worth another attempt.
const RETRYABLE_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

/// Blocking HTTP client. One instance per scraper, so each theater gets its own pool.
#[derive(Debug)]
pub struct HttpClient {
    inner: reqwest::blocking::Client,
    delay: Duration,
    last_request: Option<Instant>,
    retry_count: u32,
    backoff_secs: Vec<u64>,
}

impl HttpClient {
    /// Client with default User-Agent, timeout and retry policy.
    pub fn new() -> Result<Self, FetchError> {
        Self::builder().build()
    }

    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// GET with retries on 429/5xx gateway statuses, timeouts and connection errors.
    ///
    /// The last response is returned whatever its status; the caller decides
    /// what a non-2xx status means.
    pub fn get_with_retry(
        &mut self,
        url: &str,
    ) -> Result<reqwest::blocking::Response, FetchError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let last_attempt = attempt >= self.retry_count;
            self.wait_delay();
            let result = self.inner.get(url).send();
            self.last_request = Some(Instant::now());
            match result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if RETRYABLE_STATUS.contains(&status) && !last_attempt {
                        warn!(url, status, attempt, "retryable HTTP status");
                        self.backoff(attempt);
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    let retryable = e.is_timeout() || e.is_connect();
                    if retryable && !last_attempt {
                        warn!(url, attempt, error = %e, "transient network error");
                        self.backoff(attempt);
                        continue;
                    }
                    return Err(FetchError::Network {
                        url: url.to_string(),
                        source: e,
                    });
                }
            }
        }
    }

    /// GET and read the body as text. Non-2xx final status is an error.
    pub fn get_text(&mut self, url: &str) -> Result<String, FetchError> {
        let response = self.get_with_retry(url)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let body = response.text().map_err(|e| FetchError::BodyRead {
            url: url.to_string(),
            source: e,
        })?;
        debug!(url, bytes = body.len(), "fetched page");
        Ok(body)
    }

    fn backoff(&self, attempt: u32) {
        let secs = self
            .backoff_secs
            .get(attempt.saturating_sub(1) as usize)
            .or(self.backoff_secs.last())
            .copied()
            .unwrap_or(1);
        std::thread::sleep(Duration::from_secs(secs));
    }

    fn wait_delay(&self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                std::thread::sleep(self.delay - elapsed);
            }
        }
    }
}

/// Builder for HttpClient with optional User-Agent, delay, timeout, and retry settings.
#[derive(Debug)]
pub struct HttpClientBuilder {
    user_agent: Option<String>,
    delay_ms: u64,
    timeout_secs: u64,
    retry_count: u32,
    retry_backoff_secs: Vec<u64>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            delay_ms: 0,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff_secs: DEFAULT_BACKOFF_SECS.to_vec(),
        }
    }
}

impl HttpClientBuilder {
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Minimum gap between two requests from this client, in milliseconds. Default 0.
    pub fn delay_ms(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Request timeout in seconds. Default 30.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Number of attempts for transient failures (default 3, minimum 1).
    pub fn retry_count(mut self, n: u32) -> Self {
        self.retry_count = n.max(1);
        self
    }

    /// Backoff before each retry. If shorter than retry_count - 1, the last value is reused.
    pub fn retry_backoff_secs(mut self, secs: Vec<u64>) -> Self {
        self.retry_backoff_secs = secs;
        self
    }

    pub fn build(self) -> Result<HttpClient, FetchError> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("ja,en-US;q=0.5"),
        );
        headers.insert(
            header::UPGRADE_INSECURE_REQUESTS,
            HeaderValue::from_static("1"),
        );
        // Several theater sites serve expired or mismatched certificates.
        let inner = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .default_headers(headers)
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(self.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|source| FetchError::ClientBuild { source })?;
        let backoff_secs = if self.retry_backoff_secs.is_empty() {
            let n = self.retry_count.saturating_sub(1) as usize;
            (0..n).map(|i| 1u64 << i.min(4)).collect()
        } else {
            self.retry_backoff_secs
        };
        Ok(HttpClient {
            inner,
            delay: Duration::from_millis(self.delay_ms),
            last_request: None,
            retry_count: self.retry_count,
            backoff_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Local server answering with `statuses` in order, repeating the last one.
    /// Returns its URL and a count of requests served.
    fn serve(statuses: Vec<u16>) -> std::io::Result<(String, Arc<AtomicUsize>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let url = format!("http://{}/", listener.local_addr()?);
        let served = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&served);
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let status = statuses.get(n).or(statuses.last()).copied().unwrap_or(200);
                let body = if status == 200 { "<p>ok</p>" } else { "" };
                let response = format!(
                    "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        Ok((url, served))
    }

    fn quick_client() -> Result<HttpClient, FetchError> {
        HttpClient::builder()
            .retry_backoff_secs(vec![0])
            .timeout_secs(5)
            .build()
    }

    #[test]
    fn builder_clamps_retry_count_and_derives_backoff() -> Result<(), FetchError> {
        let client = HttpClient::builder()
            .retry_count(0)
            .retry_backoff_secs(Vec::new())
            .build()?;
        assert_eq!(client.retry_count, 1);
        assert!(client.backoff_secs.is_empty());

        let client = HttpClient::builder()
            .retry_count(4)
            .retry_backoff_secs(Vec::new())
            .build()?;
        assert_eq!(client.backoff_secs, vec![1, 2, 4]);
        Ok(())
    }

    #[test]
    fn default_policy_is_three_attempts() -> Result<(), FetchError> {
        let client = HttpClient::new()?;
        assert_eq!(client.retry_count, 3);
        assert_eq!(client.backoff_secs, vec![1, 2, 4]);
        assert_eq!(client.delay, Duration::ZERO);
        Ok(())
    }

    #[test]
    fn unreachable_host_is_a_network_error() -> Result<(), FetchError> {
        let mut client = HttpClient::builder()
            .retry_count(1)
            .timeout_secs(2)
            .build()?;
        match client.get_text("http://127.0.0.1:9/") {
            Err(FetchError::Network { url, .. }) => assert_eq!(url, "http://127.0.0.1:9/"),
            other => panic!("expected network error, got {:?}", other.map(|s| s.len())),
        }
        Ok(())
    }

    #[test]
    fn retryable_status_uses_every_attempt() -> Result<(), Box<dyn std::error::Error>> {
        let (url, served) = serve(vec![503])?;
        let mut client = quick_client()?;
        match client.get_text(&url) {
            Err(FetchError::HttpStatus { status, url: failed }) => {
                assert_eq!(status, 503);
                assert_eq!(failed, url);
            }
            other => panic!("expected HTTP 503, got {:?}", other.map(|s| s.len())),
        }
        assert_eq!(served.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[test]
    fn not_found_is_not_retried() -> Result<(), Box<dyn std::error::Error>> {
        let (url, served) = serve(vec![404])?;
        let mut client = quick_client()?;
        assert!(matches!(
            client.get_text(&url),
            Err(FetchError::HttpStatus { status: 404, .. })
        ));
        assert_eq!(served.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn transient_status_recovers() -> Result<(), Box<dyn std::error::Error>> {
        let (url, served) = serve(vec![429, 502, 200])?;
        let mut client = quick_client()?;
        assert_eq!(client.get_text(&url)?, "<p>ok</p>");
        assert_eq!(served.load(Ordering::SeqCst), 3);
        Ok(())
    }
}
