//! HTTPS transport.
use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Client;

use crate::error::{Error, Result};

/// User agent sent with every MSL request.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36";

/// Raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// POST a wire message and return the raw response.
///
/// Dropping the returned future must abort the request.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        url: &str,
        body: String,
        timeout: Duration,
    ) -> impl Future<Output = Result<HttpResponse>> + Send;
}

/// [`Transport`] over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Other(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wrap an existing client (cookies, proxies and so on are the caller's).
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    async fn send(&self, url: &str, body: String, timeout: Duration) -> Result<HttpResponse> {
        debug!("POST {} ({} bytes)", url, body.len());
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("POST {} failed: {}", url, e)))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("Failed to read response body: {}", e)))?;
        trace!("POST {} -> {} ({} bytes)", url, status, body.len());
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_range() {
        let ok = HttpResponse {
            status: 200,
            body: Vec::new(),
        };
        assert!(ok.is_success());
        let err = HttpResponse {
            status: 500,
            body: Vec::new(),
        };
        assert!(!err.is_success());
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_error() {
        let transport = HttpTransport::new().expect("client");
        let err = transport
            .send("http://127.0.0.1:9/msl", "{}".into(), Duration::from_secs(2))
            .await
            .expect_err("nothing listens on the discard port");
        assert!(err.is_retryable());
    }
}
