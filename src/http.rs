// src/http.rs
// Shared outbound HTTP client. Built once at startup from configured default
// headers and passed by reference to every source and webhook transport, so
// all outbound traffic shares one connection pool.

use anyhow::{anyhow, Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 30;

pub fn build_client(headers: &BTreeMap<String, String>) -> Result<Client> {
    let mut map = HeaderMap::new();
    for (k, v) in headers {
        let name = HeaderName::from_bytes(k.as_bytes())
            .with_context(|| format!("invalid header name {k:?}"))?;
        let value =
            HeaderValue::from_str(v).with_context(|| format!("invalid header value for {k:?}"))?;
        map.insert(name, value);
    }
    Client::builder()
        .default_headers(map)
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .context("building http client")
}

fn retryable(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

async fn backoff(attempt: u8) {
    let shift = u32::from(attempt.saturating_sub(1).min(6));
    tokio::time::sleep(Duration::from_millis(500u64 << shift)).await;
}

/// GET with a bounded retry budget and exponential backoff on transport
/// errors and retryable statuses (429/5xx). Returns the response body.
pub async fn get_text_with_retry(client: &Client, url: &str, max_retries: u8) -> Result<String> {
    let budget = max_retries.max(1);
    let mut attempt: u8 = 0;
    loop {
        attempt += 1;
        match client.get(url).send().await {
            Ok(rsp) => {
                let status = rsp.status();
                if status.is_success() {
                    return rsp.text().await.context("reading response body");
                }
                if retryable(status) && attempt < budget {
                    tracing::debug!(url, %status, attempt, "retryable status, backing off");
                    backoff(attempt).await;
                    continue;
                }
                return Err(anyhow!("GET {url} returned {status}"));
            }
            Err(e) => {
                if attempt < budget {
                    tracing::debug!(url, error = ?e, attempt, "request error, backing off");
                    backoff(attempt).await;
                    continue;
                }
                return Err(e).with_context(|| format!("GET {url}"));
            }
        }
    }
}
