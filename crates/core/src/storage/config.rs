use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Filesystem,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Filesystem => "filesystem",
        }
    }
}

/// Archive storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Directory objects are written under.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Path prefix for archives inside the store.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Externally reachable base URL of this service, used in signed links.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Key material for signed links. Must be set.
    #[serde(default)]
    pub signing_secret: String,

    /// Lifetime of signed links (default 48 hours).
    #[serde(default = "default_url_ttl")]
    pub url_ttl_secs: u64,
}

fn default_root() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_prefix() -> String {
    "zips".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_url_ttl() -> u64 {
    48 * 3600
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            root: default_root(),
            prefix: default_prefix(),
            public_base_url: default_public_base_url(),
            signing_secret: String::new(),
            url_ttl_secs: default_url_ttl(),
        }
    }
}
