// src/ingest/providers/netflix.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;

use crate::http;
use crate::ingest::types::{RawRelease, ReleasePage, ReleaseSource};

const FEED_BASE: &str = "https://about.netflix.com/api/data/releases";

#[derive(Debug, Deserialize)]
struct ReleaseFeed {
    #[serde(default)]
    data: Vec<RawRelease>,
    #[serde(default = "one", rename = "totalPages")]
    total_pages: u32,
}

fn one() -> u32 {
    1
}

/// Upcoming-releases feed, paginated JSON. Uses the process-wide shared
/// client; transport errors and 429/5xx are retried with backoff before
/// surfacing to the poll loop.
pub struct NetflixSource {
    client: reqwest::Client,
    country: String,
    language: String,
    max_retries: u8,
}

impl NetflixSource {
    pub fn new(client: reqwest::Client, country: &str, language: &str, max_retries: u8) -> Self {
        Self {
            client,
            country: country.to_string(),
            language: language.to_string(),
            max_retries,
        }
    }

    fn page_url(&self, page: u32) -> String {
        format!(
            "{FEED_BASE}?language={}&page={}&country={}",
            self.language, page, self.country
        )
    }

    fn parse_feed(body: &str) -> Result<ReleasePage> {
        let feed: ReleaseFeed = serde_json::from_str(body).context("decoding release feed json")?;
        counter!("radar_feed_items_total").increment(feed.data.len() as u64);
        let items = feed
            .data
            .into_iter()
            .map(|mut raw| {
                raw.url = watch_url(raw.video_id);
                raw
            })
            .collect();
        Ok(ReleasePage {
            items,
            total_pages: feed.total_pages.max(1),
        })
    }
}

fn watch_url(video_id: i64) -> String {
    format!("https://www.netflix.com/watch/{video_id}")
}

#[async_trait]
impl ReleaseSource for NetflixSource {
    async fn fetch_page(&self, page: u32) -> Result<ReleasePage> {
        let url = self.page_url(page);
        let body = http::get_text_with_retry(&self.client, &url, self.max_retries)
            .await
            .inspect_err(|_| counter!("radar_fetch_errors_total").increment(1))?;
        Self::parse_feed(&body)
    }

    fn name(&self) -> &str {
        "netflix"
    }
}
