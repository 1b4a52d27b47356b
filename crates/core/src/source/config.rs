use serde::{Deserialize, Serialize};

/// Available image sources
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceBackend {
    #[default]
    Flickr,
}

/// Image source configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub backend: SourceBackend,
    #[serde(default)]
    pub flickr: FlickrConfig,
}

/// Flickr public photo feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlickrConfig {
    #[serde(default = "default_feed_url")]
    pub feed_url: String,
    /// `any` or `all`
    #[serde(default = "default_tag_mode")]
    pub tag_mode: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_feed_url() -> String {
    "https://api.flickr.com/services/feeds/photos_public.gne".to_string()
}

fn default_tag_mode() -> String {
    "any".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for FlickrConfig {
    fn default() -> Self {
        Self {
            feed_url: default_feed_url(),
            tag_mode: default_tag_mode(),
            timeout_secs: default_timeout(),
        }
    }
}
