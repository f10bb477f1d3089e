// src/notify/webhook.rs
use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{Message, Notifier};

/// Multi-endpoint webhook aggregator: posts the rendered message as JSON to
/// every configured endpoint. One message counts as sent only if every
/// endpoint accepted it.
pub struct WebhookNotifier {
    endpoints: Vec<String>,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    title: &'a str,
    body: &'a str,
    tags: &'a [String],
}

impl WebhookNotifier {
    pub fn new(client: Client, endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            client,
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    /// Exponential backoff, capped at 32s so large retry budgets never
    /// overflow the shift.
    fn backoff_delay(attempt: u8) -> Duration {
        let shift = u64::from(attempt.saturating_sub(1)).min(6);
        Duration::from_millis(500u64 << shift)
    }

    async fn post_one(&self, url: &str, payload: &WebhookPayload<'_>) -> Result<()> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(url)
                .timeout(self.timeout)
                .json(payload)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Self::backoff_delay(attempt)).await;
                            continue;
                        }
                        return Err(anyhow!("webhook HTTP error: {e}"));
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Self::backoff_delay(attempt)).await;
                        continue;
                    }
                    return Err(anyhow!("webhook request failed: {e}"));
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, msg: &Message) -> Result<()> {
        if self.endpoints.is_empty() {
            tracing::debug!("webhook notifier has no endpoints configured");
            return Ok(());
        }
        let payload = WebhookPayload {
            title: &msg.title,
            body: &msg.body,
            tags: &msg.tags,
        };
        let mut failed = 0usize;
        for url in &self.endpoints {
            if let Err(e) = self.post_one(url, &payload).await {
                tracing::warn!(endpoint = %url, error = %e, "webhook endpoint failed");
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(anyhow!(
                "{failed}/{} webhook endpoints failed",
                self.endpoints.len()
            ));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_plateaus() {
        assert_eq!(WebhookNotifier::backoff_delay(1), Duration::from_millis(500));
        assert_eq!(WebhookNotifier::backoff_delay(2), Duration::from_millis(1_000));
        assert_eq!(WebhookNotifier::backoff_delay(7), Duration::from_secs(32));
        assert_eq!(WebhookNotifier::backoff_delay(8), Duration::from_secs(32));
        assert_eq!(WebhookNotifier::backoff_delay(255), Duration::from_secs(32));
    }
}
