//! Flickr public photo feed source.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{FlickrConfig, ImageRecord, ImageSource, SourceError};

#[derive(Debug, Deserialize)]
struct FeedResponse {
    #[serde(default)]
    items: Vec<FeedItem>,
}

#[derive(Debug, Deserialize)]
struct FeedItem {
    #[serde(default)]
    title: String,
    media: FeedMedia,
}

#[derive(Debug, Deserialize)]
struct FeedMedia {
    m: String,
}

/// Searches the public Flickr feed (no API key required).
pub struct FlickrFeedSource {
    client: Client,
    config: FlickrConfig,
}

impl FlickrFeedSource {
    pub fn new(config: FlickrConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SourceError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn build_url(&self, tags: &str) -> String {
        format!(
            "{}?tags={}&tagmode={}&format=json&nojsoncallback=1",
            self.config.feed_url,
            urlencoding::encode(tags),
            urlencoding::encode(&self.config.tag_mode)
        )
    }
}

/// Parse a feed body into records.
///
/// The feed escapes apostrophes as `\'`, which is not valid JSON.
fn parse_feed(body: &str) -> Result<Vec<ImageRecord>, SourceError> {
    let body = body.replace("\\'", "'");
    let feed: FeedResponse = serde_json::from_str(&body)
        .map_err(|e| SourceError::ApiError(format!("Failed to parse feed: {}", e)))?;

    Ok(feed
        .items
        .into_iter()
        .enumerate()
        .map(|(index, item)| ImageRecord {
            source_url: large_variant(&item.media.m),
            title: item.title,
            index,
        })
        .collect())
}

/// The feed links the small (`_m`) rendition; archives get the large (`_b`) one.
fn large_variant(url: &str) -> String {
    match url.rfind("_m.") {
        Some(pos) => format!("{}_b.{}", &url[..pos], &url[pos + 3..]),
        None => url.to_string(),
    }
}

#[async_trait]
impl ImageSource for FlickrFeedSource {
    fn name(&self) -> &str {
        "flickr"
    }

    async fn search(&self, tags: &str) -> Result<Vec<ImageRecord>, SourceError> {
        let url = self.build_url(tags);
        debug!(tags = %tags, "Querying Flickr feed");

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout
            } else if e.is_connect() {
                SourceError::ConnectionFailed(e.to_string())
            } else {
                SourceError::ApiError(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::ApiError(format!(
                "HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout
            } else {
                SourceError::ApiError(format!("Failed to read response: {}", e))
            }
        })?;

        let records = parse_feed(&body)?;
        debug!(tags = %tags, count = records.len(), "Flickr feed returned");
        Ok(records)
    }
}
