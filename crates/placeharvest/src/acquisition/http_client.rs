//! Async HTTP client wrapping reqwest.
//!
//! Not a browser, just HTTP requests. One client per identity: the proxy,
//! user agent, language and cookie jar all belong to the identity that
//! owns the client. Handles redirects and timeouts, and retries once on a
//! network error or 5xx.

use crate::pool::Identity;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use std::time::Duration;

const RETRY_DELAY_MS: u64 = 500;

/// Response from an HTTP GET request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Final URL after redirects.
    pub final_url: String,
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

/// HTTP client for the cheap fetch path.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    /// Client presenting the identity's fingerprint through its proxy.
    pub fn for_identity(identity: &Identity, timeout_ms: u64) -> Result<Self> {
        Self::build(
            &identity.fingerprint.user_agent,
            &identity.fingerprint.accept_language,
            identity.proxy.as_deref(),
            timeout_ms,
        )
    }

    fn build(
        user_agent: &str,
        accept_language: &str,
        proxy: Option<&str>,
        timeout_ms: u64,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(accept_language).context("invalid Accept-Language value")?,
        );

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(user_agent)
            .default_headers(headers)
            .cookie_store(true);
        if let Some(proxy) = proxy {
            builder = builder
                .proxy(reqwest::Proxy::all(proxy).with_context(|| format!("invalid proxy {proxy}"))?);
        }

        let client = builder.build().context("failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// Single GET with at most one retry on a network error or 5xx.
    ///
    /// Any status is returned as a response; classifying it is the
    /// caller's job.
    pub async fn get(&self, url: &str, timeout_ms: u64) -> Result<HttpResponse> {
        let mut retried = false;

        loop {
            let resp = self
                .client
                .get(url)
                .timeout(Duration::from_millis(timeout_ms))
                .send()
                .await;

            match resp {
                Ok(r) => {
                    let status = r.status().as_u16();
                    if status >= 500 && !retried {
                        retried = true;
                        tracing::debug!(url, status, "server error, retrying once");
                        tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
                        continue;
                    }

                    let final_url = r.url().to_string();
                    let body = r.text().await.context("failed to read response body")?;

                    return Ok(HttpResponse {
                        final_url,
                        status,
                        body,
                    });
                }
                Err(e) if !retried => {
                    retried = true;
                    tracing::debug!(url, "network error, retrying once: {e}");
                    tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
