// src/ingest/types.rs
use anyhow::Result;

/// One loosely-typed item as delivered by a release feed. Field names follow
/// the upstream JSON; `url` is filled in by the provider after decoding.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct RawRelease {
    #[serde(default)]
    pub title1: String,
    #[serde(default)]
    pub title2: String,
    #[serde(default, rename = "videoID")]
    pub video_id: i64,
    #[serde(default)]
    pub country: String,
    #[serde(default, rename = "startTime")]
    pub start_time: i64,
    #[serde(default, rename = "collection")]
    pub collection: i64,
    #[serde(default)]
    pub image: String,
    #[serde(default, rename = "genre")]
    pub genre: i64,
    #[serde(default)]
    pub url: String,
}

/// One page of a paginated release feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReleasePage {
    pub items: Vec<RawRelease>,
    pub total_pages: u32,
}

/// A pollable release source. Pages are 1-based; a fetch error ends
/// pagination for the current cycle (the caller does not raise).
#[async_trait::async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn fetch_page(&self, page: u32) -> Result<ReleasePage>;
    fn name(&self) -> &str;
}
